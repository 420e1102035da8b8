//! Bulk transfer engine for large model files.
//!
//! Uploads go through a negotiated multipart session: the file is split into
//! fixed-size parts, parts are PUT to signed URLs in bounded batches, and the
//! session is completed with the parts in numeric order. Downloads run through
//! a fixed pool of workers that stream whole objects into memory and hand
//! them to the caller as they finish.

pub mod chunk;
pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod negotiator;
pub mod part;
pub mod progress;
pub mod providers;
pub mod records;
pub mod resolver;
pub mod types;
pub mod upload;

#[cfg(test)]
mod testing;

pub use config::{ProgressWeighting, TransferConfig};
pub use download::{plan_backlog, DownloadScheduler, LoadObserver, LoadReport, PrimaryPredicate};
pub use engine::{TransferEngine, UploadOutcome};
pub use error::{TransferError, TransferResult};
pub use negotiator::{CompletedPartRef, ObjectCatalog, SessionNegotiator, SessionTicket};
pub use progress::{ProgressBoard, ProgressCallback, ProgressCell, ProgressReporter};
pub use providers::{S3Config, S3Negotiator, ServiceConfig, SignedUrlService};
pub use records::{MetadataStore, ModelRecord, TursoRecordStore};
pub use resolver::{AlwaysOverwrite, NeverOverwrite, OverwritePrompt, OverwriteResolver, Resolution};
pub use types::{
    ByteRange, CompletedUpload, Direction, DownloadTask, ObjectRef, PartResult, TaskState,
    TransferItem, UploadSession, UploadSource,
};
pub use upload::MultipartUploader;
