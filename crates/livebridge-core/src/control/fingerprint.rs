//! Stable bridge identity
//!
//! A fingerprint is the BLAKE3 hash of a canonical JSON rendering of a
//! [`BridgeConfig`]: object keys sorted recursively, no insignificant
//! whitespace, and the target list sorted by each target's canonical form.
//! Two configs with the same fingerprint are the same logical bridge.

use super::{BridgeConfig, TargetConfig};
use crate::hash::compute_hash;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identity of a bridge across reconciliation cycles
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

/// Render `value` as canonical JSON (keys sorted, compact).
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn to_value<T: Serialize>(config: &T) -> Value {
    // Config types only hold strings, numbers and JSON values, which always
    // serialize.
    serde_json::to_value(config).unwrap_or(Value::Null)
}

impl TargetConfig {
    /// Canonical JSON of this target
    pub fn canonical(&self) -> String {
        canonical_json(&to_value(self))
    }
}

impl BridgeConfig {
    /// Canonical JSON of the whole bridge, targets sorted
    pub fn canonical(&self) -> String {
        let mut value = to_value(self);
        if let Some(Value::Array(targets)) = value.get_mut("targets") {
            targets.sort_by_cached_key(canonical_json);
        }
        canonical_json(&value)
    }

    /// Canonical JSON of the source part only (targets removed)
    ///
    /// Two bridge entries with equal source identity are merged during
    /// normalization.
    pub fn source_identity(&self) -> String {
        let mut value = to_value(self);
        if let Value::Object(map) = &mut value {
            map.remove("targets");
        }
        canonical_json(&value)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint(compute_hash(self.canonical().as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> BridgeConfig {
        BridgeConfig::new("liveblog")
            .with_source_id("b1")
            .with_target(TargetConfig::new("slack").with_target_id("c1"))
    }

    #[test]
    fn test_canonical_json_sorts_keys_recursively() {
        let value = json!({"b": 1, "a": {"z": [true, null], "y": "x"}});
        assert_eq!(canonical_json(&value), r#"{"a":{"y":"x","z":[true,null]},"b":1}"#);
    }

    #[test]
    fn test_canonical_json_escapes_strings() {
        let value = json!({"quote\"key": "line\nbreak"});
        assert_eq!(canonical_json(&value), r#"{"quote\"key":"line\nbreak"}"#);
    }

    #[test]
    fn test_bridge_canonical_form_is_pinned() {
        assert_eq!(
            sample().canonical(),
            r#"{"source_id":"b1","targets":[{"target_id":"c1","type":"slack"}],"type":"liveblog"}"#
        );
        assert_eq!(
            sample().fingerprint().as_str(),
            compute_hash(sample().canonical().as_bytes())
        );
    }

    #[test]
    fn test_fingerprint_ignores_key_and_target_order() {
        let a: BridgeConfig = serde_json::from_str(
            r#"{"type":"feed","source_id":"s","targets":[{"type":"a"},{"type":"b","x":1}]}"#,
        )
        .unwrap();
        let b: BridgeConfig = serde_json::from_str(
            r#"{"targets":[{"x":1,"type":"b"},{"type":"a"}],"source_id":"s","type":"feed"}"#,
        )
        .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_changes_with_targets_and_settings() {
        let base = sample();

        let mut more_targets = base.clone();
        more_targets.targets.push(TargetConfig::new("log"));
        assert_ne!(base.fingerprint(), more_targets.fingerprint());

        let mut with_setting = base.clone();
        with_setting.settings.insert("lang".to_string(), json!("de"));
        assert_ne!(base.fingerprint(), with_setting.fingerprint());
    }

    #[test]
    fn test_source_identity_excludes_targets() {
        let mut other = sample();
        other.targets = vec![TargetConfig::new("log")];
        assert_eq!(sample().source_identity(), other.source_identity());
        assert_eq!(sample().source_identity(), r#"{"source_id":"b1","type":"liveblog"}"#);
    }

    #[test]
    fn test_short_fingerprint() {
        let fp = sample().fingerprint();
        assert_eq!(fp.short().len(), 12);
        assert_eq!(fp.to_string(), fp.short());
    }
}
