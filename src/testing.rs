//! In-process negotiator double shared by the unit tests

use crate::error::{TransferError, TransferResult};
use crate::negotiator::{CompletedPartRef, ObjectCatalog, SessionNegotiator, SessionTicket};
use crate::types::ObjectRef;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Mints URLs that point at a wiremock server and records every call.
pub(crate) struct FakeNegotiator {
    base: String,
    pub calls: Mutex<Vec<String>>,
    pub completed: Mutex<Vec<(String, Vec<CompletedPartRef>)>>,
    pub aborted: Mutex<Vec<SessionTicket>>,
    pub objects: Mutex<Vec<ObjectRef>>,
    pub fail_start: AtomicBool,
    pub fail_complete: AtomicBool,
    pub fail_listing: AtomicBool,
}

impl FakeNegotiator {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            calls: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            aborted: Mutex::new(Vec::new()),
            objects: Mutex::new(Vec::new()),
            fail_start: AtomicBool::new(false),
            fail_complete: AtomicBool::new(false),
            fail_listing: AtomicBool::new(false),
        }
    }

    pub fn with_object(self, id: &str, name: &str, size: u64) -> Self {
        self.objects.lock().unwrap().push(ObjectRef {
            id: id.to_string(),
            name: name.to_string(),
            size,
        });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SessionNegotiator for FakeNegotiator {
    async fn start_session(&self, name: &str) -> TransferResult<SessionTicket> {
        self.log(format!("start:{}", name));
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(TransferError::negotiation("start_session", name, "503"));
        }
        Ok(SessionTicket {
            session_id: format!("sess-{}", name),
            remote_key: format!("models/{}", name),
        })
    }

    async fn issue_part_url(
        &self,
        _remote_key: &str,
        session_id: &str,
        part_number: u32,
    ) -> TransferResult<String> {
        Ok(format!("{}/upload/{}/{}", self.base, session_id, part_number))
    }

    async fn complete_session(
        &self,
        name: &str,
        _ticket: &SessionTicket,
        parts: &[CompletedPartRef],
    ) -> TransferResult<String> {
        self.log(format!("complete:{}", name));
        self.completed
            .lock()
            .unwrap()
            .push((name.to_string(), parts.to_vec()));
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(TransferError::negotiation("complete_session", name, "500"));
        }
        Ok(format!("obj-{}", name))
    }

    async fn abort_session(&self, ticket: &SessionTicket) -> TransferResult<()> {
        self.log(format!("abort:{}", ticket.session_id));
        self.aborted.lock().unwrap().push(ticket.clone());
        Ok(())
    }

    async fn issue_download_url(&self, name: &str) -> TransferResult<String> {
        Ok(format!("{}/download/{}", self.base, name))
    }
}

#[async_trait]
impl ObjectCatalog for FakeNegotiator {
    async fn find_object(&self, name: &str) -> TransferResult<Option<ObjectRef>> {
        self.log(format!("find:{}", name));
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.name == name)
            .cloned())
    }

    async fn delete_object(&self, object: &ObjectRef) -> TransferResult<()> {
        self.log(format!("delete:{}", object.id));
        self.objects.lock().unwrap().retain(|o| o.id != object.id);
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> TransferResult<Vec<ObjectRef>> {
        self.log(format!("list:{}", prefix));
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(TransferError::negotiation("list_objects", prefix, "timeout"));
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.name.starts_with(prefix))
            .cloned()
            .collect())
    }
}
