//! Transfer tuning knobs

use crate::error::{TransferError, TransferResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Part size: 5MB per chunk
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;
/// Parts uploaded concurrently inside one batch
pub const DEFAULT_BATCH_CONCURRENCY: usize = 8;
/// Whole-object streams kept in flight by the download pool
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 5;
/// Lifetime of a signed URL
pub const DEFAULT_URL_EXPIRY_SECS: u64 = 3600;

/// How per-item progress values are folded into the aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProgressWeighting {
    /// Every item counts the same regardless of its size.
    #[default]
    Equal,
    /// Items count in proportion to their known byte size.
    Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferConfig {
    pub chunk_size: u64,
    pub batch_concurrency: usize,
    pub download_concurrency: usize,
    /// Upper bound on how many items one load processes, after priority reordering.
    pub backlog_cap: Option<usize>,
    pub url_expiry_secs: u64,
    /// Call AbortSession when a part or the completion step fails.
    pub abort_orphaned_sessions: bool,
    pub progress_weighting: ProgressWeighting,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            backlog_cap: None,
            url_expiry_secs: DEFAULT_URL_EXPIRY_SECS,
            abort_orphaned_sessions: false,
            progress_weighting: ProgressWeighting::Equal,
        }
    }
}

impl TransferConfig {
    pub fn from_json_str(raw: &str) -> TransferResult<Self> {
        let config: TransferConfig = serde_json::from_str(raw)
            .map_err(|e| TransferError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_path(path: &Path) -> TransferResult<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> TransferResult<()> {
        if self.chunk_size == 0 {
            return Err(TransferError::Config("chunkSize must be positive".into()));
        }
        if self.batch_concurrency == 0 {
            return Err(TransferError::Config(
                "batchConcurrency must be positive".into(),
            ));
        }
        if self.download_concurrency == 0 {
            return Err(TransferError::Config(
                "downloadConcurrency must be positive".into(),
            ));
        }
        if self.backlog_cap == Some(0) {
            return Err(TransferError::Config("backlogCap must be positive".into()));
        }
        Ok(())
    }
}
