//! Part uploader - PUTs one chunk to one signed URL

use crate::error::{TransferError, TransferResult};
use crate::types::{ByteRange, PartResult, UploadSource};
use bytes::Bytes;
use log::debug;
use reqwest::header::{CONTENT_LENGTH, ETAG};
use reqwest::{Body, Client};
use std::io::SeekFrom;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

#[derive(Clone)]
pub struct PartUploader {
    client: Client,
}

impl PartUploader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Upload the bytes of `range` to `url` and capture the returned ETag.
    pub async fn upload_part(
        &self,
        name: &str,
        url: &str,
        source: &UploadSource,
        part_number: u32,
        range: ByteRange,
    ) -> TransferResult<PartResult> {
        let body = part_body(source, range)
            .await
            .map_err(|e| TransferError::transport(name, Some(part_number), e))?;

        let response = self
            .client
            .put(url)
            .header(CONTENT_LENGTH, range.len())
            .body(body)
            .send()
            .await
            .map_err(|e| TransferError::transport(name, Some(part_number), e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(TransferError::transport(
                name,
                Some(part_number),
                format!("{} - {}", status, text),
            ));
        }

        let integrity_token = match response.headers().get(ETAG).and_then(|v| v.to_str().ok()) {
            Some(etag) => etag.to_string(),
            None => {
                debug!(
                    "part_upload_no_etag: {} part={} (continuing without token)",
                    name, part_number
                );
                String::new()
            }
        };

        Ok(PartResult {
            part_number,
            integrity_token,
            range,
        })
    }
}

async fn part_body(source: &UploadSource, range: ByteRange) -> std::io::Result<Body> {
    match source {
        UploadSource::Memory(bytes) => Ok(Body::from(
            bytes.slice(range.start as usize..range.end as usize),
        )),
        UploadSource::File { path, .. } => {
            if range.is_empty() {
                return Ok(Body::from(Bytes::new()));
            }
            let mut file = File::open(path).await?;
            file.seek(SeekFrom::Start(range.start)).await?;
            let stream = ReaderStream::new(file.take(range.len()));
            Ok(Body::wrap_stream(stream))
        }
    }
}
