//! Caller-facing transfer engine
//!
//! Ties the resolver, the multipart orchestrator, the download scheduler and
//! the metadata store together behind three calls: [`TransferEngine::upload`],
//! [`TransferEngine::load_all`] and [`TransferEngine::load_prefix`].

use crate::config::TransferConfig;
use crate::download::{DownloadScheduler, LoadObserver, LoadReport, PrimaryPredicate};
use crate::error::TransferResult;
use crate::negotiator::{ObjectCatalog, SessionNegotiator};
use crate::progress::{ProgressBoard, ProgressCallback, ProgressReporter};
use crate::providers::{S3Config, S3Negotiator, ServiceConfig, SignedUrlService};
use crate::records::{MetadataStore, ModelRecord};
use crate::resolver::{OverwritePrompt, OverwriteResolver, Resolution};
use crate::types::{CompletedUpload, TransferItem, UploadSource};
use crate::upload::MultipartUploader;
use log::{info, warn};
use reqwest::Client;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded(CompletedUpload),
    /// An object with the same name exists and the caller chose to keep it.
    Declined,
}

pub struct TransferEngine {
    negotiator: Arc<dyn SessionNegotiator>,
    catalog: Arc<dyn ObjectCatalog>,
    records: Option<Arc<dyn MetadataStore>>,
    client: Client,
    config: TransferConfig,
}

impl TransferEngine {
    pub fn new(
        negotiator: Arc<dyn SessionNegotiator>,
        catalog: Arc<dyn ObjectCatalog>,
        config: TransferConfig,
    ) -> TransferResult<Self> {
        config.validate()?;
        Ok(Self {
            negotiator,
            catalog,
            records: None,
            client: Client::new(),
            config,
        })
    }

    /// Engine backed by a signed-URL service.
    pub fn for_service(service: ServiceConfig, config: TransferConfig) -> TransferResult<Self> {
        let client = Client::new();
        let backend = Arc::new(SignedUrlService::new(client.clone(), service));
        Ok(Self::new(backend.clone(), backend, config)?.with_client(client))
    }

    /// Engine talking to S3-compatible storage directly.
    pub fn for_s3(s3: &S3Config, config: TransferConfig) -> TransferResult<Self> {
        let backend = Arc::new(S3Negotiator::new(s3, config.url_expiry_secs));
        Self::new(backend.clone(), backend, config)
    }

    pub fn with_records(mut self, records: Arc<dyn MetadataStore>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Upload one file under `name`.
    ///
    /// If `name` already exists the prompt decides whether it is replaced. The
    /// returned result is the single completion signal for the whole upload.
    pub async fn upload(
        &self,
        source: UploadSource,
        name: &str,
        prompt: &dyn OverwritePrompt,
        on_progress: Option<ProgressCallback>,
    ) -> TransferResult<UploadOutcome> {
        let resolver = OverwriteResolver::new(self.catalog.clone(), self.records.clone());
        if let Resolution::Declined = resolver.resolve_before_upload(name, prompt).await? {
            return Ok(UploadOutcome::Declined);
        }

        let (board, cell) = ProgressBoard::single(name, source.len());
        let reporter = ProgressReporter::new(board, on_progress);
        reporter.report();

        let uploader = MultipartUploader::new(
            self.negotiator.clone(),
            self.client.clone(),
            &self.config,
        );
        let completed = uploader.upload(&source, name, &cell, &reporter).await?;

        if let Some(records) = &self.records {
            let record = ModelRecord::new(
                &completed.name,
                &completed.remote_key,
                &completed.object_id,
                completed.size,
            );
            if let Err(e) = records.put_record(&record).await {
                warn!("record_write_failed: {} error={}", name, e);
            }
        }

        Ok(UploadOutcome::Uploaded(completed))
    }

    /// Download `items`, handing each one to `observer` as it arrives.
    pub async fn load_all(
        &self,
        items: Vec<TransferItem>,
        primary: Option<PrimaryPredicate<'_>>,
        observer: Arc<dyn LoadObserver>,
    ) -> TransferResult<LoadReport> {
        self.scheduler().load_all(items, primary, observer).await
    }

    /// List every object under `prefix` and download them all. A failed
    /// listing fails the whole call; nothing is downloaded.
    pub async fn load_prefix(
        &self,
        prefix: &str,
        primary: Option<PrimaryPredicate<'_>>,
        observer: Arc<dyn LoadObserver>,
    ) -> TransferResult<LoadReport> {
        let objects = self.catalog.list_objects(prefix).await?;
        info!("load_prefix_listed: prefix={} objects={}", prefix, objects.len());

        let items = objects
            .into_iter()
            .map(|object| TransferItem::download(object.name, object.size))
            .collect();
        self.load_all(items, primary, observer).await
    }

    fn scheduler(&self) -> DownloadScheduler {
        DownloadScheduler::new(self.negotiator.clone(), self.client.clone(), &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::TursoRecordStore;
    use crate::resolver::{AlwaysOverwrite, NeverOverwrite};
    use crate::testing::FakeNegotiator;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct Collect {
        ready: Mutex<HashMap<String, Bytes>>,
    }

    impl LoadObserver for Collect {
        fn on_item_ready(&self, name: &str, bytes: Bytes) {
            self.ready.lock().unwrap().insert(name.to_string(), bytes);
        }
    }

    fn engine(fake: Arc<FakeNegotiator>) -> TransferEngine {
        TransferEngine::new(fake.clone(), fake, TransferConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn declined_overwrite_never_starts_a_session() {
        let fake = Arc::new(FakeNegotiator::new("http://unused").with_object("obj-1", "robot.glb", 3));
        let outcome = engine(fake.clone())
            .upload(UploadSource::from(vec![1u8, 2, 3]), "robot.glb", &NeverOverwrite, None)
            .await
            .unwrap();

        assert_eq!(outcome, UploadOutcome::Declined);
        assert_eq!(fake.calls(), vec!["find:robot.glb"]);
    }

    #[tokio::test]
    async fn confirmed_overwrite_replaces_object_and_record() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"e\""))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            TursoRecordStore::open(&dir.path().join("records.db"))
                .await
                .unwrap(),
        );
        store
            .put_record(&ModelRecord::new("robot.glb", "models/robot.glb", "obj-old", 3))
            .await
            .unwrap();

        let fake =
            Arc::new(FakeNegotiator::new(server.uri()).with_object("obj-old", "robot.glb", 3));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let outcome = engine(fake.clone())
            .with_records(store.clone())
            .upload(
                UploadSource::from(vec![5u8; 64]),
                "robot.glb",
                &AlwaysOverwrite,
                Some(Arc::new(move |p: u8| sink.lock().unwrap().push(p))),
            )
            .await
            .unwrap();

        match outcome {
            UploadOutcome::Uploaded(done) => assert_eq!(done.object_id, "obj-robot.glb"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(
            fake.calls(),
            vec![
                "find:robot.glb",
                "delete:obj-old",
                "start:robot.glb",
                "complete:robot.glb"
            ]
        );
        let record = store.record_for("robot.glb").await.unwrap().unwrap();
        assert_eq!(record.object_id, "obj-robot.glb");
        assert_eq!(record.size, 64);
        assert_eq!(*seen.lock().unwrap(), vec![0, 100]);
    }

    #[tokio::test]
    async fn load_prefix_downloads_every_listed_object() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/scene/a.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"aaaa".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/download/scene/b.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"bb".to_vec()))
            .mount(&server)
            .await;

        let fake = Arc::new(
            FakeNegotiator::new(server.uri())
                .with_object("1", "scene/a.bin", 4)
                .with_object("2", "scene/b.bin", 2)
                .with_object("3", "other/c.bin", 9),
        );
        let collect = Arc::new(Collect::default());
        let report = engine(fake)
            .load_prefix("scene/", None, collect.clone())
            .await
            .unwrap();

        assert_eq!(report.delivered.len(), 2);
        assert!(report.is_complete());
        let ready = collect.ready.lock().unwrap();
        assert_eq!(ready["scene/a.bin"].as_ref(), b"aaaa");
        assert_eq!(ready["scene/b.bin"].as_ref(), b"bb");
    }

    #[tokio::test]
    async fn listing_failure_is_a_hard_error() {
        let fake = Arc::new(FakeNegotiator::new("http://unused"));
        fake.fail_listing.store(true, Ordering::SeqCst);

        let err = engine(fake)
            .load_prefix("scene/", None, Arc::new(Collect::default()))
            .await
            .unwrap_err();
        assert!(err.is_negotiation());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let fake = Arc::new(FakeNegotiator::new("http://unused"));
        let config = TransferConfig {
            download_concurrency: 0,
            ..TransferConfig::default()
        };
        assert!(TransferEngine::new(fake.clone(), fake, config).is_err());
    }
}
