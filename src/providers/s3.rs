//! Direct S3-compatible backend
//!
//! Sessions are native multipart uploads; part and download URLs are presigned
//! locally with the configured credentials. Works against AWS, R2, MinIO and
//! anything else that speaks the S3 API.

use crate::error::{TransferError, TransferResult};
use crate::negotiator::{CompletedPartRef, ObjectCatalog, SessionNegotiator, SessionTicket};
use crate::types::ObjectRef;
use async_trait::async_trait;
use aws_config::Region;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Config {
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
    /// Prepended to every model name to form the object key.
    #[serde(default)]
    pub key_prefix: String,
}

pub struct S3Negotiator {
    client: Client,
    bucket: String,
    key_prefix: String,
    url_expiry: Duration,
}

fn create_s3_client(config: &S3Config) -> Client {
    let credentials = Credentials::new(
        &config.access_key_id,
        &config.secret_access_key,
        None,
        None,
        "s3-provider",
    );

    let mut builder = S3ConfigBuilder::new()
        .credentials_provider(credentials)
        .region(Region::new(config.region.clone()));

    if let Some(endpoint_url) = config.endpoint_url.as_deref().filter(|u| !u.is_empty()) {
        builder = builder.endpoint_url(endpoint_url);
    }

    if config.force_path_style {
        builder = builder.force_path_style(true);
    }

    Client::from_conf(builder.build())
}

fn sdk_error<E>(op: &'static str, name: &str, err: E) -> TransferError
where
    E: std::error::Error,
{
    TransferError::negotiation(op, name, DisplayErrorContext(err))
}

impl S3Negotiator {
    pub fn new(config: &S3Config, url_expiry_secs: u64) -> Self {
        Self {
            client: create_s3_client(config),
            bucket: config.bucket.clone(),
            key_prefix: config.key_prefix.clone(),
            url_expiry: Duration::from_secs(url_expiry_secs),
        }
    }

    fn key_for(&self, name: &str) -> String {
        format!("{}{}", self.key_prefix, name)
    }

    fn name_for<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(self.key_prefix.as_str()).unwrap_or(key)
    }

    fn presigning(&self, op: &'static str, name: &str) -> TransferResult<PresigningConfig> {
        PresigningConfig::builder()
            .expires_in(self.url_expiry)
            .build()
            .map_err(|e| sdk_error(op, name, e))
    }
}

#[async_trait]
impl SessionNegotiator for S3Negotiator {
    async fn start_session(&self, name: &str) -> TransferResult<SessionTicket> {
        let key = self.key_for(name);
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| sdk_error("start_session", name, e))?;

        let upload_id = response
            .upload_id()
            .ok_or_else(|| TransferError::negotiation("start_session", name, "No upload ID returned"))?
            .to_string();
        debug!("s3_multipart_created: {} key={} upload_id={}", name, key, upload_id);

        Ok(SessionTicket {
            session_id: upload_id,
            remote_key: key,
        })
    }

    async fn issue_part_url(
        &self,
        remote_key: &str,
        session_id: &str,
        part_number: u32,
    ) -> TransferResult<String> {
        let presigning_config = self.presigning("issue_part_url", remote_key)?;
        let presigned_request = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(remote_key)
            .upload_id(session_id)
            .part_number(part_number as i32)
            .presigned(presigning_config)
            .await
            .map_err(|e| sdk_error("issue_part_url", remote_key, e))?;

        Ok(presigned_request.uri().to_string())
    }

    async fn complete_session(
        &self,
        name: &str,
        ticket: &SessionTicket,
        parts: &[CompletedPartRef],
    ) -> TransferResult<String> {
        let completed_parts: Vec<CompletedPart> = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number as i32)
                    .e_tag(&part.integrity_token)
                    .build()
            })
            .collect();

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&ticket.remote_key)
            .upload_id(&ticket.session_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| sdk_error("complete_session", name, e))?;

        // S3 has no separate object id; the key identifies the object.
        Ok(ticket.remote_key.clone())
    }

    async fn abort_session(&self, ticket: &SessionTicket) -> TransferResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&ticket.remote_key)
            .upload_id(&ticket.session_id)
            .send()
            .await
            .map_err(|e| sdk_error("abort_session", &ticket.remote_key, e))?;
        Ok(())
    }

    async fn issue_download_url(&self, name: &str) -> TransferResult<String> {
        let presigning_config = self.presigning("issue_download_url", name)?;
        let presigned_request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key_for(name))
            .presigned(presigning_config)
            .await
            .map_err(|e| sdk_error("issue_download_url", name, e))?;

        Ok(presigned_request.uri().to_string())
    }
}

#[async_trait]
impl ObjectCatalog for S3Negotiator {
    async fn find_object(&self, name: &str) -> TransferResult<Option<ObjectRef>> {
        let key = self.key_for(name);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(head) => Ok(Some(ObjectRef {
                id: key,
                name: name.to_string(),
                size: head.content_length().unwrap_or(0).max(0) as u64,
            })),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(None)
                } else {
                    Err(sdk_error("find_object", name, service_err))
                }
            }
        }
    }

    async fn delete_object(&self, object: &ObjectRef) -> TransferResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object.id)
            .send()
            .await
            .map_err(|e| sdk_error("delete_object", &object.name, e))?;
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> TransferResult<Vec<ObjectRef>> {
        let key_prefix = self.key_for(prefix);
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&key_prefix)
                .max_keys(1000);
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| sdk_error("list_objects", prefix, e))?;

            objects.extend(response.contents().iter().filter_map(|obj| {
                let key = obj.key()?;
                if key.ends_with('/') {
                    return None;
                }
                Some(ObjectRef {
                    id: key.to_string(),
                    name: self.name_for(key).to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                })
            }));

            if response.is_truncated().unwrap_or(false) {
                continuation_token = response.next_continuation_token().map(|s| s.to_string());
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        debug!("s3_list_done: prefix={} objects={}", key_prefix, objects.len());
        Ok(objects)
    }
}
