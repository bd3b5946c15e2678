//! Control document kept in the storage backend

use super::ControlClient;
use crate::storage::{ErasedStorage, StoredControl};
use chrono::{DateTime, Utc};
use livebridge_core::control::{ControlDocument, ControlError, canonical_json};
use livebridge_core::hash::compute_hash;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

fn storage_error(e: impl fmt::Display) -> ControlError {
    ControlError::Storage {
        message: e.to_string(),
    }
}

async fn fetch(
    storage: &dyn ErasedStorage,
    updated_since: Option<DateTime<Utc>>,
) -> Result<Option<StoredControl>, ControlError> {
    storage.get_control(updated_since).await.map_err(storage_error)
}

async fn store(storage: &dyn ErasedStorage, doc: &ControlDocument) -> Result<(), ControlError> {
    if storage.save_control(doc).await.map_err(storage_error)? {
        info!("Saved control document to {} storage", storage.name());
        Ok(())
    } else {
        Err(ControlError::Storage {
            message: format!("{} storage refused the control document", storage.name()),
        })
    }
}

/// Reads the newest control row. A change is a row newer than the one seen
/// at the last load.
pub struct StorageControl {
    storage: Arc<dyn ErasedStorage>,
    loaded_at: Mutex<Option<DateTime<Utc>>>,
}

impl fmt::Debug for StorageControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageControl")
            .field("storage", &self.storage.name())
            .finish_non_exhaustive()
    }
}

impl StorageControl {
    pub const LOCATION: &'static str = "storage";

    pub fn new(storage: Arc<dyn ErasedStorage>) -> Self {
        Self {
            storage,
            loaded_at: Mutex::new(None),
        }
    }

    fn loaded_at(&self) -> Option<DateTime<Utc>> {
        *self.loaded_at.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl ControlClient for StorageControl {
    fn name(&self) -> &str {
        Self::LOCATION
    }

    async fn load(&self, _path: &str) -> Result<ControlDocument, ControlError> {
        let stored = fetch(self.storage.as_ref(), None)
            .await?
            .ok_or_else(|| ControlError::Empty {
                location: Self::LOCATION.to_string(),
            })?;
        *self.loaded_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(stored.updated);
        debug!("Loaded control document updated at {}", stored.updated);
        Ok(stored.data)
    }

    async fn save(&self, _path: &str, doc: &ControlDocument) -> Result<(), ControlError> {
        store(self.storage.as_ref(), doc).await
    }

    async fn check_for_change(&self, _path: &str) -> Result<bool, ControlError> {
        Ok(fetch(self.storage.as_ref(), self.loaded_at()).await?.is_some())
    }
}

/// Reads the control row like [`StorageControl`], but detects changes by
/// comparing a checksum of the document body instead of its timestamp.
pub struct ChecksumControl {
    storage: Arc<dyn ErasedStorage>,
    checksum: Mutex<Option<String>>,
}

impl fmt::Debug for ChecksumControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChecksumControl")
            .field("storage", &self.storage.name())
            .field("checksum", &self.checksum())
            .finish()
    }
}

impl ChecksumControl {
    pub const LOCATION: &'static str = "checksum";

    pub fn new(storage: Arc<dyn ErasedStorage>) -> Self {
        Self {
            storage,
            checksum: Mutex::new(None),
        }
    }

    /// Checksum of the document seen at the last load
    pub fn checksum(&self) -> Option<String> {
        self.checksum
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn checksum_of(doc: &ControlDocument) -> Result<String, ControlError> {
        Ok(compute_hash(canonical_json(&doc.to_value()?).as_bytes()))
    }
}

#[async_trait::async_trait]
impl ControlClient for ChecksumControl {
    fn name(&self) -> &str {
        Self::LOCATION
    }

    async fn load(&self, _path: &str) -> Result<ControlDocument, ControlError> {
        let stored = fetch(self.storage.as_ref(), None)
            .await?
            .ok_or_else(|| ControlError::Empty {
                location: Self::LOCATION.to_string(),
            })?;
        let checksum = Self::checksum_of(&stored.data)?;
        debug!("Loaded control document with checksum {}", checksum);
        *self.checksum.lock().unwrap_or_else(|e| e.into_inner()) = Some(checksum);
        Ok(stored.data)
    }

    async fn save(&self, _path: &str, doc: &ControlDocument) -> Result<(), ControlError> {
        store(self.storage.as_ref(), doc).await
    }

    async fn check_for_change(&self, _path: &str) -> Result<bool, ControlError> {
        let Some(stored) = fetch(self.storage.as_ref(), None).await? else {
            return Ok(false);
        };
        Ok(self.checksum() != Some(Self::checksum_of(&stored.data)?))
    }
}
