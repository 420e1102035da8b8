//! Metadata records for uploaded models
//!
//! One row per stored model, keyed by its logical name. The resolver drops the
//! row when a model is overwritten and the engine writes a fresh one after
//! every successful upload.

use crate::error::{TransferError, TransferResult};
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::Mutex;
use turso::{Builder, Connection};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    pub name: String,
    pub remote_key: String,
    pub object_id: String,
    pub size: i64,
    /// Unix timestamp (seconds)
    pub uploaded_at: i64,
}

impl ModelRecord {
    pub fn new(
        name: impl Into<String>,
        remote_key: impl Into<String>,
        object_id: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            name: name.into(),
            remote_key: remote_key.into(),
            object_id: object_id.into(),
            size: size as i64,
            uploaded_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn record_for(&self, name: &str) -> TransferResult<Option<ModelRecord>>;

    /// Insert or replace the record for `record.name`.
    async fn put_record(&self, record: &ModelRecord) -> TransferResult<()>;

    /// Remove the record for `name`. Returns whether a row was deleted.
    async fn delete_record(&self, name: &str) -> TransferResult<bool>;
}

impl From<turso::Error> for TransferError {
    fn from(err: turso::Error) -> Self {
        TransferError::Record(err.to_string())
    }
}

fn table_sql() -> &'static str {
    "
    CREATE TABLE IF NOT EXISTS model_records (
        name TEXT PRIMARY KEY,
        remote_key TEXT NOT NULL,
        object_id TEXT NOT NULL,
        size INTEGER NOT NULL,
        uploaded_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_model_records_object ON model_records(object_id);
    "
}

/// Local turso database holding [`ModelRecord`]s.
pub struct TursoRecordStore {
    // Serialize access; the connection is not safe for concurrent use.
    conn: Mutex<Connection>,
}

impl TursoRecordStore {
    pub async fn open(db_path: &Path) -> TransferResult<Self> {
        let path = db_path.to_str().ok_or_else(|| {
            TransferError::Config(format!("database path is not UTF-8: {}", db_path.display()))
        })?;
        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        conn.execute_batch(table_sql()).await?;
        info!("records_open: {}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Every record, ordered by name.
    pub async fn list_records(&self) -> TransferResult<Vec<ModelRecord>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT name, remote_key, object_id, size, uploaded_at
                 FROM model_records ORDER BY name",
                (),
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(ModelRecord {
                name: row.get(0)?,
                remote_key: row.get(1)?,
                object_id: row.get(2)?,
                size: row.get(3)?,
                uploaded_at: row.get(4)?,
            });
        }
        Ok(records)
    }
}

#[async_trait]
impl MetadataStore for TursoRecordStore {
    async fn record_for(&self, name: &str) -> TransferResult<Option<ModelRecord>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT name, remote_key, object_id, size, uploaded_at
                 FROM model_records WHERE name = ?1",
                turso::params![name],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(ModelRecord {
                name: row.get(0)?,
                remote_key: row.get(1)?,
                object_id: row.get(2)?,
                size: row.get(3)?,
                uploaded_at: row.get(4)?,
            }))
        } else {
            Ok(None)
        }
    }

    async fn put_record(&self, record: &ModelRecord) -> TransferResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO model_records (name, remote_key, object_id, size, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (name) DO UPDATE SET
                remote_key = ?2, object_id = ?3, size = ?4, uploaded_at = ?5",
            turso::params![
                record.name.clone(),
                record.remote_key.clone(),
                record.object_id.clone(),
                record.size,
                record.uploaded_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete_record(&self, name: &str) -> TransferResult<bool> {
        let conn = self.conn.lock().await;
        let deleted = conn
            .execute(
                "DELETE FROM model_records WHERE name = ?1",
                turso::params![name],
            )
            .await?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, TursoRecordStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TursoRecordStore::open(&dir.path().join("records.db"))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn put_then_read_back() {
        let (_dir, store) = store().await;
        let record = ModelRecord::new("robot.glb", "models/robot.glb", "obj-1", 12 * 1024 * 1024);
        store.put_record(&record).await.unwrap();

        let loaded = store.record_for("robot.glb").await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(store.record_for("missing.glb").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_replaces_existing_row() {
        let (_dir, store) = store().await;
        store
            .put_record(&ModelRecord::new("a.glb", "models/a.glb", "obj-old", 10))
            .await
            .unwrap();
        store
            .put_record(&ModelRecord::new("a.glb", "models/a.glb", "obj-new", 20))
            .await
            .unwrap();

        let records = store.list_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].object_id, "obj-new");
        assert_eq!(records[0].size, 20);
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_existed() {
        let (_dir, store) = store().await;
        store
            .put_record(&ModelRecord::new("b.glb", "models/b.glb", "obj-b", 1))
            .await
            .unwrap();

        assert!(store.delete_record("b.glb").await.unwrap());
        assert!(!store.delete_record("b.glb").await.unwrap());
        assert!(store.record_for("b.glb").await.unwrap().is_none());
    }
}
