//! Storage of sync records and control data
//!
//! One storage client is built by [`connect`] at startup and shared as
//! `Arc<dyn ErasedStorage>` by dispatch, bridges and the storage-backed
//! control clients.

mod dummy;
mod file;
mod memory;
pub mod mock;

pub use dummy::DummyStorage;
pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use mock::{MockStorage, MockStorageCall};

use chrono::{DateTime, Utc};
use livebridge_core::config::StorageSettings;
use livebridge_core::{ControlDocument, SyncRecord};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tracing::info;

/// Storage errors with structured variants
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend error: {message}")]
    Backend {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unsupported storage dsn '{dsn}'")]
    UnsupportedDsn { dsn: String },
}

/// Control document as stored, with the time it was saved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredControl {
    pub data: ControlDocument,
    pub updated: DateTime<Utc>,
}

/// Storage backend.
///
/// Uses RPITIT with explicit Send bounds; [`ErasedStorage`] is the
/// object-safe twin used everywhere else.
pub trait Storage: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Create tables/collections. Idempotent.
    fn setup(&self) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn insert_post(
        &self,
        record: &SyncRecord,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn update_post(
        &self,
        record: &SyncRecord,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Remove a record; returns whether one existed
    fn delete_post(
        &self,
        target_id: &str,
        post_id: &str,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    fn get_post(
        &self,
        target_id: &str,
        post_id: &str,
    ) -> impl Future<Output = Result<Option<SyncRecord>, StorageError>> + Send;

    /// Newest `updated` timestamp among the records of a source
    fn get_last_updated(
        &self,
        source_id: &str,
    ) -> impl Future<Output = Result<Option<DateTime<Utc>>, StorageError>> + Send;

    /// Subset of `post_ids` that already have a record for this source
    fn get_known_posts(
        &self,
        source_id: &str,
        post_ids: &[String],
    ) -> impl Future<Output = Result<Vec<String>, StorageError>> + Send;

    /// Stored control document, only if saved after `updated_since`
    fn get_control(
        &self,
        updated_since: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<Option<StoredControl>, StorageError>> + Send;

    fn save_control(
        &self,
        doc: &ControlDocument,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;
}

type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Object-safe version of [`Storage`]
pub trait ErasedStorage: Send + Sync {
    fn name(&self) -> &str;
    fn setup<'a>(&'a self) -> StorageFuture<'a, bool>;
    fn insert_post<'a>(&'a self, record: &'a SyncRecord) -> StorageFuture<'a, ()>;
    fn update_post<'a>(&'a self, record: &'a SyncRecord) -> StorageFuture<'a, ()>;
    fn delete_post<'a>(&'a self, target_id: &'a str, post_id: &'a str) -> StorageFuture<'a, bool>;
    fn get_post<'a>(
        &'a self,
        target_id: &'a str,
        post_id: &'a str,
    ) -> StorageFuture<'a, Option<SyncRecord>>;
    fn get_last_updated<'a>(&'a self, source_id: &'a str)
    -> StorageFuture<'a, Option<DateTime<Utc>>>;
    fn get_known_posts<'a>(
        &'a self,
        source_id: &'a str,
        post_ids: &'a [String],
    ) -> StorageFuture<'a, Vec<String>>;
    fn get_control<'a>(
        &'a self,
        updated_since: Option<DateTime<Utc>>,
    ) -> StorageFuture<'a, Option<StoredControl>>;
    fn save_control<'a>(&'a self, doc: &'a ControlDocument) -> StorageFuture<'a, bool>;
}

impl<T: Storage> ErasedStorage for T {
    fn name(&self) -> &str {
        Storage::name(self)
    }

    fn setup<'a>(&'a self) -> StorageFuture<'a, bool> {
        Box::pin(Storage::setup(self))
    }

    fn insert_post<'a>(&'a self, record: &'a SyncRecord) -> StorageFuture<'a, ()> {
        Box::pin(Storage::insert_post(self, record))
    }

    fn update_post<'a>(&'a self, record: &'a SyncRecord) -> StorageFuture<'a, ()> {
        Box::pin(Storage::update_post(self, record))
    }

    fn delete_post<'a>(&'a self, target_id: &'a str, post_id: &'a str) -> StorageFuture<'a, bool> {
        Box::pin(Storage::delete_post(self, target_id, post_id))
    }

    fn get_post<'a>(
        &'a self,
        target_id: &'a str,
        post_id: &'a str,
    ) -> StorageFuture<'a, Option<SyncRecord>> {
        Box::pin(Storage::get_post(self, target_id, post_id))
    }

    fn get_last_updated<'a>(
        &'a self,
        source_id: &'a str,
    ) -> StorageFuture<'a, Option<DateTime<Utc>>> {
        Box::pin(Storage::get_last_updated(self, source_id))
    }

    fn get_known_posts<'a>(
        &'a self,
        source_id: &'a str,
        post_ids: &'a [String],
    ) -> StorageFuture<'a, Vec<String>> {
        Box::pin(Storage::get_known_posts(self, source_id, post_ids))
    }

    fn get_control<'a>(
        &'a self,
        updated_since: Option<DateTime<Utc>>,
    ) -> StorageFuture<'a, Option<StoredControl>> {
        Box::pin(Storage::get_control(self, updated_since))
    }

    fn save_control<'a>(&'a self, doc: &'a ControlDocument) -> StorageFuture<'a, bool> {
        Box::pin(Storage::save_control(self, doc))
    }
}

/// Build the storage client selected by `settings.dsn`.
///
/// Supported: `memory://`, `dummy://` and `file://<path>`.
///
/// # Errors
///
/// Returns [`StorageError::UnsupportedDsn`] for any other scheme.
pub fn connect(settings: &StorageSettings) -> Result<Arc<dyn ErasedStorage>, StorageError> {
    let dsn = settings.dsn.trim();
    let storage: Arc<dyn ErasedStorage> = if dsn == "memory://" || dsn.is_empty() {
        Arc::new(MemoryStorage::new())
    } else if dsn == "dummy://" {
        Arc::new(DummyStorage)
    } else if let Some(path) = dsn.strip_prefix("file://") {
        Arc::new(FileStorage::new(
            path,
            &settings.table_name,
            &settings.control_table_name,
        ))
    } else {
        return Err(StorageError::UnsupportedDsn {
            dsn: dsn.to_string(),
        });
    };
    info!("Using {} storage", storage.name());
    Ok(storage)
}
