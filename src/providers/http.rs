//! Signed-URL service client
//!
//! Every negotiation step is one JSON round-trip. The service signs URLs with
//! its own credentials; this side only ever sees the URLs.

use crate::error::{TransferError, TransferResult};
use crate::negotiator::{CompletedPartRef, ObjectCatalog, SessionNegotiator, SessionTicket};
use crate::types::ObjectRef;
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub base_url: String,
    /// Sent as a bearer token on every request when set.
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Serialize)]
struct StartRequest<'a> {
    name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PartUrlRequest<'a> {
    remote_key: &'a str,
    session_id: &'a str,
    part_number: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest<'a> {
    name: &'a str,
    remote_key: &'a str,
    session_id: &'a str,
    parts: &'a [CompletedPartRef],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AbortRequest<'a> {
    remote_key: &'a str,
    session_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedUrlResponse {
    signed_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteResponse {
    object_id: String,
}

pub struct SignedUrlService {
    client: Client,
    config: ServiceConfig,
}

impl SignedUrlService {
    pub fn new(client: Client, config: ServiceConfig) -> Self {
        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(
        &self,
        op: &'static str,
        name: &str,
        request: RequestBuilder,
    ) -> TransferResult<reqwest::Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| TransferError::negotiation(op, name, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(TransferError::negotiation(
                op,
                name,
                format!("{} - {}", status, text),
            ));
        }
        Ok(response)
    }

    async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        op: &'static str,
        name: &str,
        path: &str,
        body: &B,
    ) -> TransferResult<R> {
        let request = self.client.post(self.url(path)).json(body);
        let response = self.send(op, name, request).await?;
        response
            .json::<R>()
            .await
            .map_err(|e| TransferError::negotiation(op, name, e))
    }

    async fn get_objects(
        &self,
        op: &'static str,
        key: &str,
        value: &str,
    ) -> TransferResult<Vec<ObjectRef>> {
        let url = Url::parse_with_params(&self.url("/objects"), &[(key, value)])
            .map_err(|e| TransferError::negotiation(op, value, e))?;
        let response = self.send(op, value, self.client.get(url)).await?;
        response
            .json::<Vec<ObjectRef>>()
            .await
            .map_err(|e| TransferError::negotiation(op, value, e))
    }
}

#[async_trait]
impl SessionNegotiator for SignedUrlService {
    async fn start_session(&self, name: &str) -> TransferResult<SessionTicket> {
        let ticket: SessionTicket = self
            .post_json("start_session", name, "/uploads/start", &StartRequest { name })
            .await?;
        debug!(
            "service_session_started: {} session={} key={}",
            name, ticket.session_id, ticket.remote_key
        );
        Ok(ticket)
    }

    async fn issue_part_url(
        &self,
        remote_key: &str,
        session_id: &str,
        part_number: u32,
    ) -> TransferResult<String> {
        let response: SignedUrlResponse = self
            .post_json(
                "issue_part_url",
                remote_key,
                "/uploads/part-url",
                &PartUrlRequest {
                    remote_key,
                    session_id,
                    part_number,
                },
            )
            .await?;
        Ok(response.signed_url)
    }

    async fn complete_session(
        &self,
        name: &str,
        ticket: &SessionTicket,
        parts: &[CompletedPartRef],
    ) -> TransferResult<String> {
        let response: CompleteResponse = self
            .post_json(
                "complete_session",
                name,
                "/uploads/complete",
                &CompleteRequest {
                    name,
                    remote_key: &ticket.remote_key,
                    session_id: &ticket.session_id,
                    parts,
                },
            )
            .await?;
        Ok(response.object_id)
    }

    async fn abort_session(&self, ticket: &SessionTicket) -> TransferResult<()> {
        let request = self.client.post(self.url("/uploads/abort")).json(&AbortRequest {
            remote_key: &ticket.remote_key,
            session_id: &ticket.session_id,
        });
        self.send("abort_session", &ticket.remote_key, request).await?;
        Ok(())
    }

    async fn issue_download_url(&self, name: &str) -> TransferResult<String> {
        let response: SignedUrlResponse = self
            .post_json(
                "issue_download_url",
                name,
                "/downloads/url",
                &StartRequest { name },
            )
            .await?;
        Ok(response.signed_url)
    }
}

#[async_trait]
impl ObjectCatalog for SignedUrlService {
    async fn find_object(&self, name: &str) -> TransferResult<Option<ObjectRef>> {
        let objects = self.get_objects("find_object", "name", name).await?;
        Ok(objects.into_iter().find(|o| o.name == name))
    }

    async fn delete_object(&self, object: &ObjectRef) -> TransferResult<()> {
        let request = self
            .client
            .delete(self.url(&format!("/objects/{}", object.id)));
        match self.send("delete_object", &object.name, request).await {
            Ok(_) => Ok(()),
            // 404: already gone
            Err(TransferError::Negotiation { message, .. })
                if message.starts_with(StatusCode::NOT_FOUND.as_str()) =>
            {
                debug!("service_delete_missing: {} id={}", object.name, object.id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn list_objects(&self, prefix: &str) -> TransferResult<Vec<ObjectRef>> {
        self.get_objects("list_objects", "prefix", prefix).await
    }
}
