//! Session negotiation contracts
//!
//! The engine never talks to storage directly; it asks a [`SessionNegotiator`]
//! to open/close multipart sessions and to mint signed URLs, and an
//! [`ObjectCatalog`] to look up and remove existing objects.

use crate::error::TransferResult;
use crate::types::ObjectRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Handle returned by `StartSession`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTicket {
    pub session_id: String,
    pub remote_key: String,
}

/// One entry of the `CompleteSession` part list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPartRef {
    pub integrity_token: String,
    pub part_number: u32,
}

#[async_trait]
pub trait SessionNegotiator: Send + Sync {
    async fn start_session(&self, name: &str) -> TransferResult<SessionTicket>;

    async fn issue_part_url(
        &self,
        remote_key: &str,
        session_id: &str,
        part_number: u32,
    ) -> TransferResult<String>;

    /// `parts` must be sorted by part number. Returns the stored object's id.
    async fn complete_session(
        &self,
        name: &str,
        ticket: &SessionTicket,
        parts: &[CompletedPartRef],
    ) -> TransferResult<String>;

    async fn abort_session(&self, ticket: &SessionTicket) -> TransferResult<()>;

    async fn issue_download_url(&self, name: &str) -> TransferResult<String>;
}

#[async_trait]
pub trait ObjectCatalog: Send + Sync {
    async fn find_object(&self, name: &str) -> TransferResult<Option<ObjectRef>>;

    async fn delete_object(&self, object: &ObjectRef) -> TransferResult<()>;

    async fn list_objects(&self, prefix: &str) -> TransferResult<Vec<ObjectRef>>;
}
