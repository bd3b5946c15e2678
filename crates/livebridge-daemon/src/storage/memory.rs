//! In-process storage

use super::{Storage, StorageError, StoredControl};
use chrono::{DateTime, Utc};
use livebridge_core::{ControlDocument, SyncRecord};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use tracing::debug;

/// Record and control tables shared by the in-memory and file backends
#[derive(Debug, Default, Clone)]
pub(super) struct Tables {
    pub posts: BTreeMap<(String, String), SyncRecord>,
    pub control: Option<StoredControl>,
}

impl Tables {
    pub fn upsert(&mut self, record: &SyncRecord) {
        if self.posts.insert(record.key(), record.clone()).is_some() {
            debug!(
                "Replaced record for post {} on {}",
                record.post_id, record.target_id
            );
        }
    }

    pub fn remove(&mut self, target_id: &str, post_id: &str) -> bool {
        self.posts
            .remove(&(target_id.to_string(), post_id.to_string()))
            .is_some()
    }

    pub fn get(&self, target_id: &str, post_id: &str) -> Option<SyncRecord> {
        self.posts
            .get(&(target_id.to_string(), post_id.to_string()))
            .cloned()
    }

    pub fn last_updated(&self, source_id: &str) -> Option<DateTime<Utc>> {
        self.posts
            .values()
            .filter(|r| r.source_id == source_id)
            .map(|r| r.updated)
            .max()
    }

    pub fn known_posts(&self, source_id: &str, post_ids: &[String]) -> Vec<String> {
        let known: HashSet<&str> = self
            .posts
            .values()
            .filter(|r| r.source_id == source_id)
            .map(|r| r.post_id.as_str())
            .collect();
        post_ids
            .iter()
            .filter(|id| known.contains(id.as_str()))
            .cloned()
            .collect()
    }

    pub fn control_since(&self, updated_since: Option<DateTime<Utc>>) -> Option<StoredControl> {
        self.control
            .as_ref()
            .filter(|c| updated_since.is_none_or(|since| c.updated > since))
            .cloned()
    }

    pub fn save_control(&mut self, doc: &ControlDocument) {
        // Strictly increasing, so a save is always newer than the last load
        let now = Utc::now();
        let updated = match &self.control {
            Some(previous) if previous.updated >= now => {
                previous.updated + chrono::Duration::microseconds(1)
            }
            _ => now,
        };
        self.control = Some(StoredControl {
            data: doc.clone(),
            updated,
        });
    }
}

/// Storage that lives and dies with the process
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_tables<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut tables)
    }

    /// Number of stored sync records
    pub fn post_count(&self) -> usize {
        self.with_tables(|t| t.posts.len())
    }
}

impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn setup(&self) -> Result<bool, StorageError> {
        Ok(true)
    }

    async fn insert_post(&self, record: &SyncRecord) -> Result<(), StorageError> {
        self.with_tables(|t| t.upsert(record));
        Ok(())
    }

    async fn update_post(&self, record: &SyncRecord) -> Result<(), StorageError> {
        self.with_tables(|t| t.upsert(record));
        Ok(())
    }

    async fn delete_post(&self, target_id: &str, post_id: &str) -> Result<bool, StorageError> {
        Ok(self.with_tables(|t| t.remove(target_id, post_id)))
    }

    async fn get_post(
        &self,
        target_id: &str,
        post_id: &str,
    ) -> Result<Option<SyncRecord>, StorageError> {
        Ok(self.with_tables(|t| t.get(target_id, post_id)))
    }

    async fn get_last_updated(&self, source_id: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self.with_tables(|t| t.last_updated(source_id)))
    }

    async fn get_known_posts(
        &self,
        source_id: &str,
        post_ids: &[String],
    ) -> Result<Vec<String>, StorageError> {
        Ok(self.with_tables(|t| t.known_posts(source_id, post_ids)))
    }

    async fn get_control(
        &self,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<Option<StoredControl>, StorageError> {
        Ok(self.with_tables(|t| t.control_since(updated_since)))
    }

    async fn save_control(&self, doc: &ControlDocument) -> Result<bool, StorageError> {
        self.with_tables(|t| t.save_control(doc));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ErasedStorage;
    use chrono::TimeZone;
    use livebridge_core::{BridgeConfig, TargetDoc};
    use serde_json::json;

    fn record(target_id: &str, post_id: &str, minute: u32) -> SyncRecord {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 10, minute, 0).unwrap();
        SyncRecord {
            target_id: target_id.to_string(),
            post_id: post_id.to_string(),
            source_id: "blog-1".to_string(),
            text: "text".to_string(),
            sticky: false,
            created: ts,
            updated: ts,
            target_doc: TargetDoc::new(json!({"id": post_id})),
        }
    }

    fn storage() -> Box<dyn ErasedStorage> {
        Box::new(MemoryStorage::new())
    }

    #[tokio::test]
    async fn test_insert_get_delete() {
        let db = storage();
        assert!(db.setup().await.unwrap());
        assert!(db.setup().await.unwrap());

        db.insert_post(&record("t1", "p1", 0)).await.unwrap();
        let found = db.get_post("t1", "p1").await.unwrap().unwrap();
        assert_eq!(found.target_doc.get("id"), Some(&json!("p1")));
        assert!(db.get_post("t2", "p1").await.unwrap().is_none());

        assert!(db.delete_post("t1", "p1").await.unwrap());
        assert!(!db.delete_post("t1", "p1").await.unwrap());
        assert!(db.get_post("t1", "p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_replaces_record() {
        let db = storage();
        db.insert_post(&record("t1", "p1", 0)).await.unwrap();
        let mut changed = record("t1", "p1", 5);
        changed.text = "new".to_string();
        db.update_post(&changed).await.unwrap();

        assert_eq!(db.get_post("t1", "p1").await.unwrap().unwrap().text, "new");
    }

    #[tokio::test]
    async fn test_last_updated_and_known_posts() {
        let db = storage();
        assert!(db.get_last_updated("blog-1").await.unwrap().is_none());

        db.insert_post(&record("t1", "p1", 3)).await.unwrap();
        db.insert_post(&record("t1", "p2", 7)).await.unwrap();

        let last = db.get_last_updated("blog-1").await.unwrap().unwrap();
        assert_eq!(last, Utc.with_ymd_and_hms(2026, 3, 1, 10, 7, 0).unwrap());
        assert!(db.get_last_updated("other").await.unwrap().is_none());

        let candidates = vec!["p0".to_string(), "p2".to_string(), "p1".to_string()];
        let known = db.get_known_posts("blog-1", &candidates).await.unwrap();
        assert_eq!(known, vec!["p2".to_string(), "p1".to_string()]);
    }

    #[tokio::test]
    async fn test_control_roundtrip_and_since() {
        let db = storage();
        assert!(db.get_control(None).await.unwrap().is_none());

        let doc = ControlDocument {
            bridges: vec![BridgeConfig::new("liveblog")],
            ..Default::default()
        };
        assert!(db.save_control(&doc).await.unwrap());

        let stored = db.get_control(None).await.unwrap().unwrap();
        assert_eq!(stored.data, doc);
        assert!(db.get_control(Some(stored.updated)).await.unwrap().is_none());

        db.save_control(&ControlDocument::default()).await.unwrap();
        let newer = db.get_control(Some(stored.updated)).await.unwrap().unwrap();
        assert!(newer.data.is_empty());
    }
}
