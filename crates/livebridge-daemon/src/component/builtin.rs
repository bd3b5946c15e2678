//! Built-in components
//!
//! - `jsonfile` source: polls a local JSON array of posts
//! - `log` target: writes every action to the log and echoes a document
//!
//! Both exist to run and smoke-test a daemon without any network adapter.

use super::post::{Post, SourceItem, SourcePost};
use super::registry::{ComponentRegistry, SourceFactory, TargetFactory};
use super::traits::{ErasedSource, ErasedTarget, Source, Target};
use super::types::{ComponentError, SourceMode};
use chrono::{DateTime, Utc};
use livebridge_core::{BridgeConfig, TargetConfig, TargetDoc};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Register every built-in component
pub fn register_builtins(registry: &mut ComponentRegistry) {
    registry.register_source(SourceFactory {
        name: JsonFileSource::TYPE.to_string(),
        description: "Polls a local JSON array of posts".to_string(),
        create: Arc::new(|config| {
            Ok(Arc::new(JsonFileSource::from_config(config)?) as Arc<dyn ErasedSource>)
        }),
    });
    registry.register_target(TargetFactory {
        name: LogTarget::TYPE.to_string(),
        description: "Logs every delivery".to_string(),
        create: Arc::new(|config| Ok(Arc::new(LogTarget::from_config(config)) as Arc<dyn ErasedTarget>)),
    });
}

/// Post backed by a JSON object.
///
/// Recognized fields: `id` (string or number, required), `source_id`,
/// `created` and `updated` (RFC 3339), and the flags `update`, `deleted`,
/// `sticky`. `updated` defaults to `created`, and a post counts as an update
/// when flagged or when `updated` is later than `created`.
#[derive(Debug, Clone)]
pub struct JsonPost {
    source_type: String,
    source_id: String,
    id: String,
    data: Value,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

impl JsonPost {
    pub fn from_value(
        data: Value,
        source_type: &str,
        default_source_id: &str,
    ) -> Result<Self, ComponentError> {
        let id = match data.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(ComponentError::source_error("post without id")),
        };
        let source_id = data
            .get("source_id")
            .and_then(Value::as_str)
            .unwrap_or(default_source_id)
            .to_string();
        let created = timestamp(&data, "created")?.unwrap_or_else(Utc::now);
        let updated = timestamp(&data, "updated")?.unwrap_or(created);

        Ok(Self {
            source_type: source_type.to_string(),
            source_id,
            id,
            data,
            created,
            updated,
        })
    }

    fn flag(&self, key: &str) -> bool {
        self.data.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

fn timestamp(data: &Value, key: &str) -> Result<Option<DateTime<Utc>>, ComponentError> {
    match data.get(key).and_then(Value::as_str) {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|e| ComponentError::Source {
                message: format!("invalid '{key}' timestamp {raw:?}"),
                source: Some(Box::new(e)),
            }),
        None => Ok(None),
    }
}

impl SourcePost for JsonPost {
    fn id(&self) -> &str {
        &self.id
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn source_type(&self) -> &str {
        &self.source_type
    }

    fn data(&self) -> &Value {
        &self.data
    }

    fn created(&self) -> DateTime<Utc> {
        self.created
    }

    fn updated(&self) -> DateTime<Utc> {
        self.updated
    }

    fn is_update(&self) -> bool {
        self.flag("update") || self.updated > self.created
    }

    fn is_deleted(&self) -> bool {
        self.flag("deleted")
    }

    fn is_sticky(&self) -> bool {
        self.flag("sticky")
    }
}

/// Polling source reading a JSON array of posts from the `endpoint` path
#[derive(Debug)]
pub struct JsonFileSource {
    path: PathBuf,
    source_id: String,
    last_updated: Mutex<Option<DateTime<Utc>>>,
}

impl JsonFileSource {
    pub const TYPE: &'static str = "jsonfile";

    pub fn new(path: impl Into<PathBuf>, source_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source_id: source_id.into(),
            last_updated: Mutex::new(None),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Result<Self, ComponentError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| ComponentError::config("jsonfile source needs an endpoint path"))?;
        let source_id = config.source_id.as_deref().unwrap_or(endpoint);
        Ok(Self::new(endpoint, source_id))
    }
}

impl Source for JsonFileSource {
    fn source_type(&self) -> &str {
        Self::TYPE
    }

    fn mode(&self) -> SourceMode {
        SourceMode::Polling
    }

    fn last_updated(&self) -> Option<DateTime<Utc>> {
        *self.last_updated.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_last_updated(&self, last_updated: Option<DateTime<Utc>>) {
        *self.last_updated.lock().unwrap_or_else(|e| e.into_inner()) = last_updated;
    }

    async fn poll(&self) -> Result<Vec<SourceItem>, ComponentError> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ComponentError::Source {
                message: format!("failed to read {}", self.path.display()),
                source: Some(Box::new(e)),
            })?;
        let entries: Vec<Value> = serde_json::from_str(&body).map_err(|e| ComponentError::Source {
            message: format!("failed to parse {}", self.path.display()),
            source: Some(Box::new(e)),
        })?;

        let since = Source::last_updated(self);
        let mut posts = Vec::new();
        for entry in entries {
            let post = match JsonPost::from_value(entry, Self::TYPE, &self.source_id) {
                Ok(post) => post,
                Err(e) => {
                    warn!("Skipping entry in {}: {}", self.path.display(), e);
                    continue;
                }
            };
            if since.is_none_or(|since| post.updated > since) {
                posts.push(post);
            }
        }
        posts.sort_by_key(|p| p.updated);
        debug!("Polled {} new post(s) from {}", posts.len(), self.path.display());

        Ok(posts
            .into_iter()
            .map(|p| Arc::new(p) as SourceItem)
            .collect())
    }
}

/// Target that only logs what it would do
#[derive(Debug, Clone)]
pub struct LogTarget {
    target_id: String,
}

impl LogTarget {
    pub const TYPE: &'static str = "log";

    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
        }
    }

    pub fn from_config(config: &TargetConfig) -> Self {
        Self::new(config.target_id.as_deref().unwrap_or(Self::TYPE))
    }

    fn echo(&self, post: &Post, action: &str) -> TargetDoc {
        TargetDoc::new(json!({
            "id": post.id(),
            "target_id": self.target_id,
            "action": action,
            "at": Utc::now().to_rfc3339(),
        }))
    }
}

impl Target for LogTarget {
    fn target_type(&self) -> &str {
        Self::TYPE
    }

    fn target_id(&self) -> &str {
        &self.target_id
    }

    async fn post_item(&self, post: &Post) -> Result<Option<TargetDoc>, ComponentError> {
        info!("[{}] create {}: {}", self.target_id, post.id(), post.content);
        Ok(Some(self.echo(post, "create")))
    }

    async fn update_item(&self, post: &Post) -> Result<Option<TargetDoc>, ComponentError> {
        info!("[{}] update {}: {}", self.target_id, post.id(), post.content);
        Ok(Some(self.echo(post, "update")))
    }

    async fn delete_item(&self, post: &Post) -> Result<bool, ComponentError> {
        info!("[{}] delete {}", self.target_id, post.id());
        Ok(true)
    }
}
