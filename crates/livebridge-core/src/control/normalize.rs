//! Control document normalization

use super::{AuthRef, ControlDocument, ControlError};
use std::collections::{HashMap, HashSet};
use tracing::info;

/// Merge bridge entries that share a source identity and drop duplicate
/// targets. Bridge order follows first appearance.
pub fn remove_doubles(doc: &ControlDocument) -> ControlDocument {
    let mut filtered = ControlDocument {
        auth: doc.auth.clone(),
        bridges: Vec::new(),
    };
    let mut index_by_source: HashMap<String, usize> = HashMap::new();
    let mut seen_targets: Vec<HashSet<String>> = Vec::new();

    for bridge in &doc.bridges {
        let identity = bridge.source_identity();
        let index = *index_by_source.entry(identity).or_insert_with(|| {
            let mut source = bridge.clone();
            source.targets.clear();
            filtered.bridges.push(source);
            seen_targets.push(HashSet::new());
            filtered.bridges.len() - 1
        });

        for target in &bridge.targets {
            if seen_targets[index].insert(target.canonical()) {
                filtered.bridges[index].targets.push(target.clone());
            } else {
                info!(
                    "Filtering double target [{}] from source [{}]",
                    target.target_type,
                    bridge.source_id.as_deref().unwrap_or("-")
                );
            }
        }
    }

    filtered
}

/// Replace named auth references with the credentials from `doc.auth`.
///
/// # Errors
///
/// Returns [`ControlError::UnknownAuth`] when a target names credentials the
/// document does not define. An unknown name on a bridge is left untouched.
pub fn resolve_auth(doc: &ControlDocument) -> Result<ControlDocument, ControlError> {
    let mut resolved = doc.clone();

    for bridge in &mut resolved.bridges {
        if let Some(name) = bridge.auth.as_ref().and_then(AuthRef::name) {
            if let Some(creds) = doc.auth.get(name) {
                bridge.auth = Some(AuthRef::Resolved(creds.clone()));
            }
        }

        for target in &mut bridge.targets {
            if let Some(name) = target.auth.as_ref().and_then(AuthRef::name) {
                match doc.auth.get(name) {
                    Some(creds) => target.auth = Some(AuthRef::Resolved(creds.clone())),
                    None => {
                        return Err(ControlError::UnknownAuth {
                            name: name.to_string(),
                        });
                    }
                }
            }
        }
    }

    Ok(resolved)
}

/// Full normalization applied to every loaded document
pub fn normalize(doc: &ControlDocument, with_auth: bool) -> Result<ControlDocument, ControlError> {
    let filtered = remove_doubles(doc);
    if with_auth {
        resolve_auth(&filtered)
    } else {
        Ok(filtered)
    }
}
