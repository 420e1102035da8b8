//! Session negotiator backends
//!
//! - `http`: a JSON signed-URL service that owns the storage credentials
//! - `s3`: direct S3-compatible storage, URLs presigned locally via aws-sdk-s3

pub mod http;
pub mod s3;

pub use http::{ServiceConfig, SignedUrlService};
pub use s3::{S3Config, S3Negotiator};
