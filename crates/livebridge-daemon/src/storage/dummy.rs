//! Storage that accepts everything and remembers nothing

use super::{Storage, StorageError, StoredControl};
use chrono::{DateTime, Utc};
use livebridge_core::{ControlDocument, SyncRecord};
use tracing::debug;

/// Every write succeeds, every read comes back empty.
///
/// Each post therefore looks new to every target on every poll.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyStorage;

impl Storage for DummyStorage {
    fn name(&self) -> &str {
        "dummy"
    }

    async fn setup(&self) -> Result<bool, StorageError> {
        Ok(true)
    }

    async fn insert_post(&self, record: &SyncRecord) -> Result<(), StorageError> {
        debug!("Dummy insert of {} on {}", record.post_id, record.target_id);
        Ok(())
    }

    async fn update_post(&self, record: &SyncRecord) -> Result<(), StorageError> {
        debug!("Dummy update of {} on {}", record.post_id, record.target_id);
        Ok(())
    }

    async fn delete_post(&self, _target_id: &str, _post_id: &str) -> Result<bool, StorageError> {
        Ok(true)
    }

    async fn get_post(
        &self,
        _target_id: &str,
        _post_id: &str,
    ) -> Result<Option<SyncRecord>, StorageError> {
        Ok(None)
    }

    async fn get_last_updated(&self, _source_id: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(None)
    }

    async fn get_known_posts(
        &self,
        _source_id: &str,
        _post_ids: &[String],
    ) -> Result<Vec<String>, StorageError> {
        Ok(Vec::new())
    }

    async fn get_control(
        &self,
        _updated_since: Option<DateTime<Utc>>,
    ) -> Result<Option<StoredControl>, StorageError> {
        Ok(None)
    }

    async fn save_control(&self, _doc: &ControlDocument) -> Result<bool, StorageError> {
        Ok(true)
    }
}
