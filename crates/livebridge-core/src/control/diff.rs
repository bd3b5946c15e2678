//! Bridge set differences between two control documents

use super::{BridgeConfig, ControlDocument, Fingerprint};
use std::collections::HashSet;

/// Result of comparing two control documents by bridge fingerprint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlDiff {
    /// Bridges in the current document that were not in the previous one
    pub new_bridges: Vec<BridgeConfig>,
    /// Bridges in the previous document that are gone from the current one
    pub removed_bridges: Vec<BridgeConfig>,
}

impl ControlDiff {
    pub fn is_empty(&self) -> bool {
        self.new_bridges.is_empty() && self.removed_bridges.is_empty()
    }
}

fn fingerprints(doc: &ControlDocument) -> HashSet<Fingerprint> {
    doc.bridges.iter().map(BridgeConfig::fingerprint).collect()
}

/// Compare `current` against `previous`.
///
/// With no previous document every current bridge is new. A bridge whose
/// config changed in any way shows up in both lists.
pub fn diff(previous: Option<&ControlDocument>, current: &ControlDocument) -> ControlDiff {
    let Some(previous) = previous else {
        return ControlDiff {
            new_bridges: current.bridges.clone(),
            removed_bridges: Vec::new(),
        };
    };

    let before = fingerprints(previous);
    let after = fingerprints(current);

    ControlDiff {
        new_bridges: current
            .bridges
            .iter()
            .filter(|b| !before.contains(&b.fingerprint()))
            .cloned()
            .collect(),
        removed_bridges: previous
            .bridges
            .iter()
            .filter(|b| !after.contains(&b.fingerprint()))
            .cloned()
            .collect(),
    }
}
