//! Posts observed at a source
//!
//! A [`SourcePost`] is the source-native item: immutable, shared, and the
//! owner of the classification rules (only the source knows what "updated"
//! or "deleted" means for its payload). A [`Post`] wraps one source item for
//! delivery to exactly one target and carries the per-target state dispatch
//! fills in: converted content, downloaded images, the existing sync record
//! and the target-side document.

use super::types::PostAction;
use chrono::{DateTime, Utc};
use livebridge_core::{SyncRecord, TargetDoc};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Source-native post
pub trait SourcePost: Send + Sync + fmt::Debug {
    /// Id of the post at its source
    fn id(&self) -> &str;

    /// Id of the source (blog, feed, channel) the post belongs to
    fn source_id(&self) -> &str;

    /// Source type key, used to look up converters
    fn source_type(&self) -> &str;

    /// Raw payload handed to converters
    fn data(&self) -> &Value;

    fn created(&self) -> DateTime<Utc>;

    fn updated(&self) -> DateTime<Utc>;

    fn is_update(&self) -> bool;

    fn is_deleted(&self) -> bool;

    fn is_sticky(&self) -> bool;

    /// Decide what the target has to do, given whether a sync record exists.
    fn classify(&self, known: bool) -> PostAction {
        default_action(known, self.is_update(), self.is_deleted())
    }
}

/// Classification used when a source does not override [`SourcePost::classify`]
pub fn default_action(known: bool, updated: bool, deleted: bool) -> PostAction {
    match (known, deleted) {
        (false, false) => PostAction::Create,
        (true, true) => PostAction::Delete,
        (true, false) if updated => PostAction::Update,
        _ => PostAction::Ignore,
    }
}

/// Shared handle to a source post
pub type SourceItem = Arc<dyn SourcePost>;

/// One source item on its way to one target
#[derive(Debug)]
pub struct Post {
    item: SourceItem,
    /// Converted content
    pub content: String,
    /// Images downloaded by the converter
    pub images: Vec<PathBuf>,
    existing: Option<SyncRecord>,
    target_id: Option<String>,
    target_doc: Option<TargetDoc>,
}

impl Post {
    pub fn new(item: SourceItem) -> Self {
        Self {
            item,
            content: String::new(),
            images: Vec::new(),
            existing: None,
            target_id: None,
            target_doc: None,
        }
    }

    /// Independent copy for delivery to another target.
    ///
    /// The source payload is immutable and stays shared; everything a
    /// dispatch may change is copied.
    pub fn fork(&self) -> Self {
        Self {
            item: Arc::clone(&self.item),
            content: self.content.clone(),
            images: self.images.clone(),
            existing: self.existing.clone(),
            target_id: self.target_id.clone(),
            target_doc: self.target_doc.clone(),
        }
    }

    pub fn item(&self) -> &SourceItem {
        &self.item
    }

    pub fn id(&self) -> &str {
        self.item.id()
    }

    pub fn source_id(&self) -> &str {
        self.item.source_id()
    }

    pub fn source_type(&self) -> &str {
        self.item.source_type()
    }

    pub fn data(&self) -> &Value {
        self.item.data()
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.item.created()
    }

    pub fn updated(&self) -> DateTime<Utc> {
        self.item.updated()
    }

    pub fn is_deleted(&self) -> bool {
        self.item.is_deleted()
    }

    pub fn is_sticky(&self) -> bool {
        self.item.is_sticky()
    }

    /// True once a sync record for this post and target was attached
    pub fn is_known(&self) -> bool {
        self.existing.is_some()
    }

    pub fn existing(&self) -> Option<&SyncRecord> {
        self.existing.as_ref()
    }

    pub fn set_existing(&mut self, existing: Option<SyncRecord>) {
        self.existing = existing;
    }

    /// Target id, falling back to the one in the existing record
    pub fn target_id(&self) -> Option<&str> {
        self.target_id
            .as_deref()
            .or_else(|| self.existing.as_ref().map(|r| r.target_id.as_str()))
    }

    pub fn set_target_id(&mut self, target_id: impl Into<String>) {
        self.target_id = Some(target_id.into());
    }

    /// Document of this post at the target.
    ///
    /// Falls back to the document of the existing record when none (or an
    /// empty one) was set.
    pub fn target_doc(&self) -> TargetDoc {
        match &self.target_doc {
            Some(doc) if !doc.is_empty() => doc.clone(),
            _ => self
                .existing
                .as_ref()
                .map(|r| r.target_doc.clone())
                .unwrap_or_default(),
        }
    }

    pub fn set_target_doc(&mut self, doc: TargetDoc) {
        self.target_doc = Some(doc);
    }

    /// Action for the current state of the post
    pub fn action(&self) -> PostAction {
        self.item.classify(self.is_known())
    }
}
