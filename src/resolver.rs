//! Existence/overwrite resolution before an upload

use crate::error::TransferResult;
use crate::negotiator::ObjectCatalog;
use crate::records::MetadataStore;
use crate::types::ObjectRef;
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;

/// Asks the caller whether an existing object may be replaced.
#[async_trait]
pub trait OverwritePrompt: Send + Sync {
    async fn confirm_overwrite(&self, existing: &ObjectRef) -> bool;
}

/// Replace without asking.
pub struct AlwaysOverwrite;

#[async_trait]
impl OverwritePrompt for AlwaysOverwrite {
    async fn confirm_overwrite(&self, _existing: &ObjectRef) -> bool {
        true
    }
}

/// Refuse every overwrite.
pub struct NeverOverwrite;

#[async_trait]
impl OverwritePrompt for NeverOverwrite {
    async fn confirm_overwrite(&self, _existing: &ObjectRef) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Upload may start. `replaced` is the object that was deleted to make room.
    Proceed { replaced: Option<ObjectRef> },
    /// The caller refused to overwrite; nothing was touched.
    Declined,
}

pub struct OverwriteResolver {
    catalog: Arc<dyn ObjectCatalog>,
    records: Option<Arc<dyn MetadataStore>>,
}

impl OverwriteResolver {
    pub fn new(catalog: Arc<dyn ObjectCatalog>, records: Option<Arc<dyn MetadataStore>>) -> Self {
        Self { catalog, records }
    }

    /// Check whether `name` already exists and, if so, whether it may be replaced.
    ///
    /// On confirmation the stored object and then its metadata record are
    /// deleted before this returns. The check and the later upload are not
    /// atomic: another writer may create the name in between.
    pub async fn resolve_before_upload(
        &self,
        name: &str,
        prompt: &dyn OverwritePrompt,
    ) -> TransferResult<Resolution> {
        let existing = match self.catalog.find_object(name).await? {
            Some(object) => object,
            None => return Ok(Resolution::Proceed { replaced: None }),
        };

        if !prompt.confirm_overwrite(&existing).await {
            info!("overwrite_declined: {} object={}", name, existing.id);
            return Ok(Resolution::Declined);
        }

        self.catalog.delete_object(&existing).await?;
        if let Some(records) = &self.records {
            if !records.delete_record(name).await? {
                warn!("overwrite_no_record: {} object={}", name, existing.id);
            }
        }
        info!("overwrite_confirmed: {} replaced={}", name, existing.id);

        Ok(Resolution::Proceed {
            replaced: Some(existing),
        })
    }
}
