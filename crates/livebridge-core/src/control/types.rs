//! Control document types

use super::ControlError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// The full control document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlDocument {
    /// Named credentials, referenced from `bridges[].auth` and `targets[].auth`
    #[serde(default)]
    pub auth: BTreeMap<String, Map<String, Value>>,
    /// Bridges to run
    #[serde(default)]
    pub bridges: Vec<BridgeConfig>,
}

/// Credentials of a bridge or target: a name before resolution, the
/// credential map afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthRef {
    Named(String),
    Resolved(Map<String, Value>),
}

impl AuthRef {
    pub fn name(&self) -> Option<&str> {
        match self {
            AuthRef::Named(name) => Some(name),
            AuthRef::Resolved(_) => None,
        }
    }
}

/// One source and the targets its posts are distributed to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Source adapter type key
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthRef>,
    /// Poll interval override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
    /// Adapter-specific settings
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl BridgeConfig {
    pub fn new(source_type: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            source_id: None,
            endpoint: None,
            label: None,
            auth: None,
            interval: None,
            targets: Vec::new(),
            settings: Map::new(),
        }
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_target(mut self, target: TargetConfig) -> Self {
        self.targets.push(target);
        self
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("-")
    }

    /// Poll interval, falling back to `default` when not overridden
    pub fn interval_or(&self, default: Duration) -> Duration {
        self.interval.map(Duration::from_secs).unwrap_or(default)
    }

    /// Look up an adapter-specific setting
    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }
}

/// One target a bridge delivers to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Target adapter type key
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthRef>,
    /// Adapter-specific settings
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl TargetConfig {
    pub fn new(target_type: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            target_id: None,
            endpoint: None,
            auth: None,
            settings: Map::new(),
        }
    }

    pub fn with_target_id(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }
}

/// Serialization format of a control document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
    Toml,
}

impl DocumentFormat {
    /// Pick a format from the file extension; YAML is the fallback.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => DocumentFormat::Json,
            Some("toml") => DocumentFormat::Toml,
            _ => DocumentFormat::Yaml,
        }
    }
}

impl ControlDocument {
    /// Parse a document body. An empty body yields an empty document.
    pub fn parse(body: &str, format: DocumentFormat) -> Result<Self, ControlError> {
        if body.trim().is_empty() {
            return Ok(Self::default());
        }
        let parsed = match format {
            DocumentFormat::Yaml => serde_yaml::from_str(body).map_err(|e| e.to_string()),
            DocumentFormat::Json => serde_json::from_str(body).map_err(|e| e.to_string()),
            DocumentFormat::Toml => toml::from_str(body).map_err(|e| e.to_string()),
        };
        parsed.map_err(|message| ControlError::Parse { message })
    }

    /// Parse a document from an already decoded JSON value
    pub fn from_value(value: Value) -> Result<Self, ControlError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value).map_err(|e| ControlError::Parse {
            message: e.to_string(),
        })
    }

    /// Serialize the document in the given format
    pub fn render(&self, format: DocumentFormat) -> Result<String, ControlError> {
        let rendered = match format {
            DocumentFormat::Yaml => serde_yaml::to_string(self).map_err(|e| e.to_string()),
            DocumentFormat::Json => serde_json::to_string_pretty(self).map_err(|e| e.to_string()),
            DocumentFormat::Toml => toml::to_string(self).map_err(|e| e.to_string()),
        };
        rendered.map_err(|message| ControlError::Serialize { message })
    }

    pub fn to_value(&self) -> Result<Value, ControlError> {
        serde_json::to_value(self).map_err(|e| ControlError::Serialize {
            message: e.to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const YAML_DOC: &str = r#"
auth:
  slack-bot:
    token: "xoxb-123"
bridges:
  - type: liveblog
    source_id: "blog-1"
    endpoint: "https://example.com/api"
    label: "Morning blog"
    interval: 15
    targets:
      - type: slack
        target_id: "C0123"
        auth: slack-bot
        channel_name: news
"#;

    #[test]
    fn test_parse_yaml_document() {
        let doc = ControlDocument::parse(YAML_DOC, DocumentFormat::Yaml).unwrap();

        assert_eq!(doc.bridges.len(), 1);
        assert!(doc.auth.contains_key("slack-bot"));

        let bridge = &doc.bridges[0];
        assert_eq!(bridge.source_type, "liveblog");
        assert_eq!(bridge.source_id.as_deref(), Some("blog-1"));
        assert_eq!(bridge.label(), "Morning blog");
        assert_eq!(bridge.interval_or(Duration::from_secs(60)), Duration::from_secs(15));

        let target = &bridge.targets[0];
        assert_eq!(target.target_type, "slack");
        assert_eq!(target.auth, Some(AuthRef::Named("slack-bot".to_string())));
        assert_eq!(target.setting("channel_name").and_then(|v| v.as_str()), Some("news"));
    }

    #[test]
    fn test_parse_json_and_toml_agree() {
        let json = r#"{"bridges":[{"type":"feed","source_id":"f1","targets":[{"type":"log"}]}]}"#;
        let toml = r#"
[[bridges]]
type = "feed"
source_id = "f1"

[[bridges.targets]]
type = "log"
"#;
        let from_json = ControlDocument::parse(json, DocumentFormat::Json).unwrap();
        let from_toml = ControlDocument::parse(toml, DocumentFormat::Toml).unwrap();
        assert_eq!(from_json, from_toml);
    }

    #[test]
    fn test_parse_empty_body() {
        let doc = ControlDocument::parse("  \n", DocumentFormat::Yaml).unwrap();
        assert!(doc.is_empty());
    }

    #[test]
    fn test_parse_invalid_body() {
        let err = ControlDocument::parse("bridges: [", DocumentFormat::Yaml).unwrap_err();
        assert!(matches!(err, ControlError::Parse { .. }));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(DocumentFormat::from_path(&PathBuf::from("c.json")), DocumentFormat::Json);
        assert_eq!(DocumentFormat::from_path(&PathBuf::from("c.TOML")), DocumentFormat::Toml);
        assert_eq!(DocumentFormat::from_path(&PathBuf::from("c.yml")), DocumentFormat::Yaml);
        assert_eq!(DocumentFormat::from_path(&PathBuf::from("control")), DocumentFormat::Yaml);
    }

    #[test]
    fn test_render_roundtrip_yaml() {
        let doc = ControlDocument::parse(YAML_DOC, DocumentFormat::Yaml).unwrap();
        let rendered = doc.render(DocumentFormat::Yaml).unwrap();
        let reparsed = ControlDocument::parse(&rendered, DocumentFormat::Yaml).unwrap();
        assert_eq!(doc, reparsed);
    }
}
