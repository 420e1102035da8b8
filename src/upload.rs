//! Multipart upload orchestrator
//!
//! Drives one file through StartSession -> per-part signed PUTs -> CompleteSession.
//! Parts are uploaded in fixed-size batches: parts inside a batch run
//! concurrently, batches run one after another, so the number of open
//! connections never exceeds the batch size whatever the file size.

use crate::chunk;
use crate::config::TransferConfig;
use crate::error::{TransferError, TransferResult};
use crate::negotiator::{CompletedPartRef, SessionNegotiator, SessionTicket};
use crate::part::PartUploader;
use crate::progress::{ProgressCell, ProgressReporter};
use crate::types::{ByteRange, CompletedUpload, PartResult, UploadSession, UploadSource};
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use reqwest::Client;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub struct MultipartUploader {
    negotiator: Arc<dyn SessionNegotiator>,
    parts: PartUploader,
    chunk_size: u64,
    batch_concurrency: usize,
    abort_orphaned_sessions: bool,
}

impl MultipartUploader {
    pub fn new(
        negotiator: Arc<dyn SessionNegotiator>,
        client: Client,
        config: &TransferConfig,
    ) -> Self {
        Self {
            negotiator,
            parts: PartUploader::new(client),
            chunk_size: config.chunk_size,
            batch_concurrency: config.batch_concurrency.max(1),
            abort_orphaned_sessions: config.abort_orphaned_sessions,
        }
    }

    /// Upload `source` as `name`. `cell` is this file's progress entry and
    /// `reporter` is notified after every finished part.
    pub async fn upload(
        &self,
        source: &UploadSource,
        name: &str,
        cell: &ProgressCell,
        reporter: &ProgressReporter,
    ) -> TransferResult<CompletedUpload> {
        let start_time = Instant::now();
        let file_size = source.len();

        // Nothing exists remotely yet, so a failure here needs no cleanup.
        let ticket = self.negotiator.start_session(name).await?;
        let ranges = chunk::split(file_size, self.chunk_size)?;
        let total_parts = ranges.len() as u32;
        info!(
            "multipart_start: {} key={} size={} total_parts={} batch={}",
            name, ticket.remote_key, file_size, total_parts, self.batch_concurrency
        );

        let mut session = UploadSession::new(
            ticket.session_id.clone(),
            ticket.remote_key.clone(),
            self.chunk_size,
            total_parts,
        );
        let parts_done = AtomicU32::new(0);

        for (batch_index, batch) in ranges.chunks(self.batch_concurrency).enumerate() {
            let first_part = (batch_index * self.batch_concurrency) as u32 + 1;
            let mut pending: FuturesUnordered<_> = batch
                .iter()
                .enumerate()
                .map(|(offset, range)| {
                    self.upload_one(
                        source,
                        name,
                        &ticket,
                        first_part + offset as u32,
                        *range,
                        total_parts,
                        &parts_done,
                        cell,
                        reporter,
                    )
                })
                .collect();

            // Let every sibling settle before surfacing a failure.
            let mut failures = Vec::new();
            while let Some(result) = pending.next().await {
                match result {
                    Ok(part) => session.record(part),
                    Err(e) => failures.push(e),
                }
            }
            drop(pending);

            if let Some(err) = first_failure(failures) {
                error!(
                    "multipart_batch_failed: {} batch={} error={}",
                    name, batch_index, err
                );
                self.abort_if_configured(name, &ticket).await;
                return Err(err);
            }
            debug!(
                "multipart_batch_done: {} batch={} parts_done={}/{}",
                name,
                batch_index,
                parts_done.load(Ordering::SeqCst),
                total_parts
            );
        }

        if !session.is_completable() {
            self.abort_if_configured(name, &ticket).await;
            return Err(TransferError::IncompleteSession {
                name: name.to_string(),
                expected: total_parts,
                received: session.parts.len(),
            });
        }

        let completed: Vec<CompletedPartRef> = session
            .sorted_parts()
            .into_iter()
            .map(|p| CompletedPartRef {
                integrity_token: p.integrity_token,
                part_number: p.part_number,
            })
            .collect();

        let object_id = match self
            .negotiator
            .complete_session(name, &ticket, &completed)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                error!("multipart_complete_failed: {} error={}", name, err);
                self.abort_if_configured(name, &ticket).await;
                return Err(err);
            }
        };

        cell.complete();
        reporter.report();
        info!(
            "multipart_complete: {} key={} object={} elapsed_ms={}",
            name,
            ticket.remote_key,
            object_id,
            start_time.elapsed().as_millis()
        );

        Ok(CompletedUpload {
            name: name.to_string(),
            remote_key: ticket.remote_key,
            object_id,
            size: file_size,
            parts: total_parts,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_one(
        &self,
        source: &UploadSource,
        name: &str,
        ticket: &SessionTicket,
        part_number: u32,
        range: ByteRange,
        total_parts: u32,
        parts_done: &AtomicU32,
        cell: &ProgressCell,
        reporter: &ProgressReporter,
    ) -> TransferResult<PartResult> {
        let part_timer = Instant::now();
        let url = self
            .negotiator
            .issue_part_url(&ticket.remote_key, &ticket.session_id, part_number)
            .await?;
        let part = self
            .parts
            .upload_part(name, &url, source, part_number, range)
            .await?;

        let done = parts_done.fetch_add(1, Ordering::SeqCst) + 1;
        cell.set_fraction(done as u64, total_parts as u64);
        reporter.report();
        debug!(
            "multipart_part_done: {} part={} bytes={} elapsed_ms={}",
            name,
            part_number,
            range.len(),
            part_timer.elapsed().as_millis()
        );
        Ok(part)
    }

    async fn abort_if_configured(&self, name: &str, ticket: &SessionTicket) {
        if !self.abort_orphaned_sessions {
            warn!(
                "multipart_session_orphaned: {} key={} session={}",
                name, ticket.remote_key, ticket.session_id
            );
            return;
        }
        match self.negotiator.abort_session(ticket).await {
            Ok(()) => info!("multipart_aborted: {} session={}", name, ticket.session_id),
            Err(e) => warn!(
                "multipart_abort_failed: {} session={} error={}",
                name, ticket.session_id, e
            ),
        }
    }
}

/// The failure with the lowest part number, so reports are deterministic.
fn first_failure(failures: Vec<TransferError>) -> Option<TransferError> {
    failures.into_iter().min_by_key(|e| match e {
        TransferError::Transport { part: Some(n), .. } => *n,
        _ => 0,
    })
}
