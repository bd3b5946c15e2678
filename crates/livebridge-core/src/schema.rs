//! Persisted sync record schema

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque document describing a post as it exists at a target.
///
/// Targets return whatever the remote service answered (ids, urls, revision
/// tokens); the core only stores it and hands it back on later updates and
/// deletes. Null, `{}` and `[]` count as empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetDoc(pub Value);

impl TargetDoc {
    /// An empty document (`{}`)
    pub fn empty() -> Self {
        Self(Value::Object(Map::new()))
    }

    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// True for null, empty objects, empty arrays and empty strings
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::String(s) => s.is_empty(),
            Value::Bool(b) => !b,
            Value::Number(_) => false,
        }
    }

    /// Look up a top-level field of an object document
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl Default for TargetDoc {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for TargetDoc {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Proof that a source post was delivered to a target.
///
/// One record exists per (target_id, post_id) pair. It is inserted on the
/// first successful delivery, replaced on update and removed on delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Id of the target (from the target config)
    pub target_id: String,
    /// Id of the post at its source
    pub post_id: String,
    /// Id of the source the post belongs to
    pub source_id: String,
    /// Converted text that was delivered
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sticky: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Document returned by the target
    #[serde(default)]
    pub target_doc: TargetDoc,
}

impl SyncRecord {
    /// Storage key for this record
    pub fn key(&self) -> (String, String) {
        (self.target_id.clone(), self.post_id.clone())
    }
}
