//! JSON file storage
//!
//! The whole database is one JSON document holding the record table and the
//! control table under their configured names. Every change rewrites it via
//! a temp file and rename.

use super::memory::Tables;
use super::{Storage, StorageError, StoredControl};
use chrono::{DateTime, Utc};
use livebridge_core::{ControlDocument, SyncRecord};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};
use uuid::Uuid;

/// Storage persisted to a local JSON file
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    table_name: String,
    control_table_name: String,
    tables: OnceCell<Mutex<Tables>>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>, table_name: &str, control_table_name: &str) -> Self {
        Self {
            path: path.into(),
            table_name: table_name.to_string(),
            control_table_name: control_table_name.to_string(),
            tables: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Tables, read from disk on first use
    async fn tables(&self) -> Result<&Mutex<Tables>, StorageError> {
        self.tables
            .get_or_try_init(|| async { self.read().await.map(Mutex::new) })
            .await
    }

    async fn read(&self) -> Result<Tables, StorageError> {
        let body = match tokio::fs::read_to_string(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Tables::default()),
            Err(e) => return Err(self.io_error(e)),
        };
        if body.trim().is_empty() {
            return Ok(Tables::default());
        }

        let mut root: Map<String, Value> = serde_json::from_str(&body)?;
        let mut tables = Tables::default();
        if let Some(posts) = root.remove(&self.table_name) {
            let records: Vec<SyncRecord> = serde_json::from_value(posts)?;
            for record in records {
                tables.posts.insert(record.key(), record);
            }
        }
        if let Some(control) = root.remove(&self.control_table_name) {
            tables.control = serde_json::from_value(control)?;
        }
        debug!(
            "Loaded {} record(s) from {}",
            tables.posts.len(),
            self.path.display()
        );
        Ok(tables)
    }

    async fn write(&self, tables: &Tables) -> Result<(), StorageError> {
        let records: Vec<&SyncRecord> = tables.posts.values().collect();
        let mut root = Map::new();
        root.insert(self.table_name.clone(), serde_json::to_value(records)?);
        root.insert(
            self.control_table_name.clone(),
            serde_json::to_value(&tables.control)?,
        );
        let json = serde_json::to_string_pretty(&root)?;

        // Atomic write: temp file + rename
        let temp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp_path, json.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(self.io_error(e));
        }
        Ok(())
    }

    /// Apply a change and persist the result while holding the table lock.
    /// The in-memory tables only take the change once it is on disk.
    async fn modify<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> Result<R, StorageError> {
        let mut tables = self.tables().await?.lock().await;
        let mut next = tables.clone();
        let result = f(&mut next);
        self.write(&next).await?;
        *tables = next;
        Ok(result)
    }

    async fn query<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R, StorageError> {
        let tables = self.tables().await?.lock().await;
        Ok(f(&tables))
    }
}

impl Storage for FileStorage {
    fn name(&self) -> &str {
        "file"
    }

    async fn setup(&self) -> Result<bool, StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
        }
        let tables = self.tables().await?.lock().await;
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(true);
        }
        self.write(&tables).await?;
        info!("Created storage file {}", self.path.display());
        Ok(true)
    }

    async fn insert_post(&self, record: &SyncRecord) -> Result<(), StorageError> {
        self.modify(|t| t.upsert(record)).await
    }

    async fn update_post(&self, record: &SyncRecord) -> Result<(), StorageError> {
        self.modify(|t| t.upsert(record)).await
    }

    async fn delete_post(&self, target_id: &str, post_id: &str) -> Result<bool, StorageError> {
        self.modify(|t| t.remove(target_id, post_id)).await
    }

    async fn get_post(
        &self,
        target_id: &str,
        post_id: &str,
    ) -> Result<Option<SyncRecord>, StorageError> {
        self.query(|t| t.get(target_id, post_id)).await
    }

    async fn get_last_updated(&self, source_id: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        self.query(|t| t.last_updated(source_id)).await
    }

    async fn get_known_posts(
        &self,
        source_id: &str,
        post_ids: &[String],
    ) -> Result<Vec<String>, StorageError> {
        self.query(|t| t.known_posts(source_id, post_ids)).await
    }

    async fn get_control(
        &self,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<Option<StoredControl>, StorageError> {
        self.query(|t| t.control_since(updated_since)).await
    }

    async fn save_control(&self, doc: &ControlDocument) -> Result<bool, StorageError> {
        self.modify(|t| t.save_control(doc)).await?;
        Ok(true)
    }
}
