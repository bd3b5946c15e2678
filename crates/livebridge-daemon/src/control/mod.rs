//! Control clients: where the control document lives
//!
//! A control location is either a file path or one of the storage-backed
//! keywords `storage` and `checksum`. [`ControlData`] wraps the client the
//! controller uses and normalizes and diffs every loaded document.

mod file;
mod stored;

pub use file::FileControl;
pub use stored::{ChecksumControl, StorageControl};

use crate::storage::ErasedStorage;
use livebridge_core::control::{ControlDiff, ControlDocument, ControlError, diff, normalize};
use std::sync::Arc;
use tracing::{debug, info};

/// Access to a control document location
///
/// The trait is object-safe via [`async_trait`], so the controller can hold
/// any client as `Box<dyn ControlClient>`.
#[async_trait::async_trait]
pub trait ControlClient: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Read the raw document at `path`
    async fn load(&self, path: &str) -> Result<ControlDocument, ControlError>;

    /// Replace the document at `path`
    async fn save(&self, path: &str, doc: &ControlDocument) -> Result<(), ControlError>;

    /// True when the document changed since the last [`ControlClient::load`]
    async fn check_for_change(&self, path: &str) -> Result<bool, ControlError>;

    /// Whether [`ControlClient::check_for_change`] is meaningful
    fn supports_watch(&self) -> bool {
        true
    }

    /// Release held resources
    async fn close(&self) {}
}

/// Pick the client for a control location
pub fn client_for(path: &str, storage: Arc<dyn ErasedStorage>) -> Box<dyn ControlClient> {
    match path {
        StorageControl::LOCATION => Box::new(StorageControl::new(storage)),
        ChecksumControl::LOCATION => Box::new(ChecksumControl::new(storage)),
        _ => Box::new(FileControl::new()),
    }
}

/// The controller's view of the control document
pub struct ControlData {
    client: Box<dyn ControlClient>,
    path: String,
    auto_update: bool,
    current: Option<ControlDocument>,
}

impl std::fmt::Debug for ControlData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlData")
            .field("client", &self.client.name())
            .field("path", &self.path)
            .field("auto_update", &self.auto_update)
            .field("bridges", &self.current.as_ref().map(|d| d.bridges.len()))
            .finish()
    }
}

impl ControlData {
    pub fn new(client: Box<dyn ControlClient>, path: impl Into<String>, auto_update: bool) -> Self {
        Self {
            client,
            path: path.into(),
            auto_update,
            current: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last successfully loaded (normalized) document
    pub fn current(&self) -> Option<&ControlDocument> {
        self.current.as_ref()
    }

    /// Load and normalize the document, diffed against the previous one.
    ///
    /// On error the previous document stays current.
    pub async fn load(&mut self) -> Result<ControlDiff, ControlError> {
        let raw = self.client.load(&self.path).await?;
        let doc = normalize(&raw, true)?;
        let changes = diff(self.current.as_ref(), &doc);
        info!(
            "Control data from {}: {} bridge(s), {} new, {} removed",
            self.path,
            doc.bridges.len(),
            changes.new_bridges.len(),
            changes.removed_bridges.len()
        );
        self.current = Some(doc);
        Ok(changes)
    }

    /// Write `doc` back to the control location
    pub async fn save(&self, doc: &ControlDocument) -> Result<(), ControlError> {
        self.client.save(&self.path, doc).await
    }

    /// Whether the controller should watch for changes
    pub fn is_auto_update(&self) -> bool {
        self.auto_update && self.client.supports_watch()
    }

    pub async fn check_for_change(&self) -> Result<bool, ControlError> {
        let changed = self.client.check_for_change(&self.path).await?;
        debug!("Control data at {} changed: {}", self.path, changed);
        Ok(changed)
    }

    pub async fn close(&self) {
        self.client.close().await;
    }
}
