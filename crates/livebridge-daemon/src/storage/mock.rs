//! Recording storage for testing

use super::{MemoryStorage, Storage, StorageError, StoredControl};
use chrono::{DateTime, Utc};
use livebridge_core::{ControlDocument, SyncRecord};
use std::sync::{Arc, Mutex, MutexGuard};

/// Record of storage calls for test assertions
#[derive(Debug, Clone, PartialEq)]
pub enum MockStorageCall {
    Setup,
    InsertPost { target_id: String, post_id: String },
    UpdatePost { target_id: String, post_id: String },
    DeletePost { target_id: String, post_id: String },
    GetPost { target_id: String, post_id: String },
    GetLastUpdated(String),
    GetKnownPosts(String),
    GetControl,
    SaveControl,
}

/// In-memory storage that logs every call. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockStorage {
    inner: Arc<MemoryStorage>,
    fail_setup: bool,
    fail_writes: bool,
    /// Track calls for verification
    pub call_log: Arc<Mutex<Vec<MockStorageCall>>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `setup()` fail
    pub fn failing_setup(mut self) -> Self {
        self.fail_setup = true;
        self
    }

    /// Make insert/update/delete fail
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Get a copy of the call log for assertions
    pub fn get_calls(&self) -> Vec<MockStorageCall> {
        self.calls().clone()
    }

    /// Number of logged calls matching `predicate`
    pub fn count(&self, predicate: impl Fn(&MockStorageCall) -> bool) -> usize {
        self.calls().iter().filter(|c| predicate(c)).count()
    }

    /// Number of stored sync records
    pub fn post_count(&self) -> usize {
        self.inner.post_count()
    }

    fn calls(&self) -> MutexGuard<'_, Vec<MockStorageCall>> {
        self.call_log.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn log_call(&self, call: MockStorageCall) {
        self.calls().push(call);
    }

    fn check_write(&self) -> Result<(), StorageError> {
        if self.fail_writes {
            return Err(StorageError::Backend {
                message: "scripted write failure".to_string(),
                source: None,
            });
        }
        Ok(())
    }
}

impl Storage for MockStorage {
    fn name(&self) -> &str {
        "mock"
    }

    async fn setup(&self) -> Result<bool, StorageError> {
        self.log_call(MockStorageCall::Setup);
        if self.fail_setup {
            return Err(StorageError::Backend {
                message: "scripted setup failure".to_string(),
                source: None,
            });
        }
        Ok(true)
    }

    async fn insert_post(&self, record: &SyncRecord) -> Result<(), StorageError> {
        self.log_call(MockStorageCall::InsertPost {
            target_id: record.target_id.clone(),
            post_id: record.post_id.clone(),
        });
        self.check_write()?;
        Storage::insert_post(self.inner.as_ref(), record).await
    }

    async fn update_post(&self, record: &SyncRecord) -> Result<(), StorageError> {
        self.log_call(MockStorageCall::UpdatePost {
            target_id: record.target_id.clone(),
            post_id: record.post_id.clone(),
        });
        self.check_write()?;
        Storage::update_post(self.inner.as_ref(), record).await
    }

    async fn delete_post(&self, target_id: &str, post_id: &str) -> Result<bool, StorageError> {
        self.log_call(MockStorageCall::DeletePost {
            target_id: target_id.to_string(),
            post_id: post_id.to_string(),
        });
        self.check_write()?;
        Storage::delete_post(self.inner.as_ref(), target_id, post_id).await
    }

    async fn get_post(
        &self,
        target_id: &str,
        post_id: &str,
    ) -> Result<Option<SyncRecord>, StorageError> {
        self.log_call(MockStorageCall::GetPost {
            target_id: target_id.to_string(),
            post_id: post_id.to_string(),
        });
        Storage::get_post(self.inner.as_ref(), target_id, post_id).await
    }

    async fn get_last_updated(&self, source_id: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        self.log_call(MockStorageCall::GetLastUpdated(source_id.to_string()));
        Storage::get_last_updated(self.inner.as_ref(), source_id).await
    }

    async fn get_known_posts(
        &self,
        source_id: &str,
        post_ids: &[String],
    ) -> Result<Vec<String>, StorageError> {
        self.log_call(MockStorageCall::GetKnownPosts(source_id.to_string()));
        Storage::get_known_posts(self.inner.as_ref(), source_id, post_ids).await
    }

    async fn get_control(
        &self,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<Option<StoredControl>, StorageError> {
        self.log_call(MockStorageCall::GetControl);
        Storage::get_control(self.inner.as_ref(), updated_since).await
    }

    async fn save_control(&self, doc: &ControlDocument) -> Result<bool, StorageError> {
        self.log_call(MockStorageCall::SaveControl);
        Storage::save_control(self.inner.as_ref(), doc).await
    }
}
