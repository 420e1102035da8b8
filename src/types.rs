//! Core transfer types

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

/// One file being moved. `total_bytes == 0` means the size is not known yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferItem {
    pub name: String,
    pub total_bytes: u64,
    pub direction: Direction,
}

impl TransferItem {
    pub fn download(name: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            name: name.into(),
            total_bytes,
            direction: Direction::Download,
        }
    }

    pub fn upload(name: impl Into<String>, total_bytes: u64) -> Self {
        Self {
            name: name.into(),
            total_bytes,
            direction: Direction::Upload,
        }
    }
}

/// Half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Outcome of one uploaded chunk. The integrity token is empty when the
/// backend did not return an ETag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartResult {
    pub part_number: u32,
    pub integrity_token: String,
    pub range: ByteRange,
}

/// One in-flight multipart upload. `parts` is kept in completion order.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub session_id: String,
    pub remote_key: String,
    pub parts: Vec<PartResult>,
    pub chunk_size: u64,
    pub total_parts: u32,
}

impl UploadSession {
    pub fn new(session_id: String, remote_key: String, chunk_size: u64, total_parts: u32) -> Self {
        Self {
            session_id,
            remote_key,
            parts: Vec::with_capacity(total_parts as usize),
            chunk_size,
            total_parts,
        }
    }

    pub fn record(&mut self, part: PartResult) {
        self.parts.push(part);
    }

    /// Every part number in `1..=total_parts` is present exactly once.
    pub fn is_completable(&self) -> bool {
        if self.parts.len() != self.total_parts as usize {
            return false;
        }
        let mut seen = HashSet::with_capacity(self.parts.len());
        self.parts.iter().all(|p| {
            p.part_number >= 1 && p.part_number <= self.total_parts && seen.insert(p.part_number)
        })
    }

    /// Parts in strictly ascending part-number order, as completion requires.
    pub fn sorted_parts(&self) -> Vec<PartResult> {
        let mut parts = self.parts.clone();
        parts.sort_by_key(|p| p.part_number);
        parts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Active,
    Done,
    Failed,
}

/// One item owned by the download scheduler.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub item: TransferItem,
    pub bytes_loaded: u64,
    pub state: TaskState,
}

impl DownloadTask {
    pub fn new(item: TransferItem) -> Self {
        Self {
            item,
            bytes_loaded: 0,
            state: TaskState::Pending,
        }
    }
}

/// A stored object as seen by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

/// Bytes to be uploaded.
#[derive(Debug, Clone)]
pub enum UploadSource {
    File { path: PathBuf, size: u64 },
    Memory(Bytes),
}

impl UploadSource {
    pub async fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let size = tokio::fs::metadata(&path).await?.len();
        Ok(UploadSource::File { path, size })
    }

    pub fn len(&self) -> u64 {
        match self {
            UploadSource::File { size, .. } => *size,
            UploadSource::Memory(bytes) => bytes.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Bytes> for UploadSource {
    fn from(bytes: Bytes) -> Self {
        UploadSource::Memory(bytes)
    }
}

impl From<Vec<u8>> for UploadSource {
    fn from(bytes: Vec<u8>) -> Self {
        UploadSource::Memory(Bytes::from(bytes))
    }
}

/// A finished multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedUpload {
    pub name: String,
    pub remote_key: String,
    pub object_id: String,
    pub size: u64,
    pub parts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(n: u32) -> PartResult {
        PartResult {
            part_number: n,
            integrity_token: format!("\"etag-{}\"", n),
            range: ByteRange { start: 0, end: 0 },
        }
    }

    #[test]
    fn session_completable_only_with_every_part_once() {
        let mut session = UploadSession::new("s".into(), "k".into(), 10, 3);
        session.record(part(3));
        session.record(part(1));
        assert!(!session.is_completable());

        session.record(part(1));
        assert!(!session.is_completable(), "duplicate must not count");

        session.parts.pop();
        session.record(part(2));
        assert!(session.is_completable());
        let order: Vec<u32> = session.sorted_parts().iter().map(|p| p.part_number).collect();
        assert_eq!(order, vec![1, 2, 3]);
        // completion order is preserved on the session itself
        assert_eq!(session.parts[0].part_number, 3);
    }

    #[test]
    fn out_of_range_part_is_not_completable() {
        let mut session = UploadSession::new("s".into(), "k".into(), 10, 2);
        session.record(part(1));
        session.record(part(4));
        assert!(!session.is_completable());
    }
}
