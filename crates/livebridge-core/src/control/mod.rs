//! Control document: the declarative list of bridges
//!
//! A control document names every bridge (one source plus its targets) the
//! daemon should run, and a map of named credentials that bridges and targets
//! can reference. Documents are normalized (duplicate sources merged, auth
//! references resolved) before use, and every bridge is identified across
//! reloads by its [`Fingerprint`].

mod diff;
mod error;
mod fingerprint;
mod normalize;
mod types;

pub use diff::{ControlDiff, diff};
pub use error::ControlError;
pub use fingerprint::{Fingerprint, canonical_json};
pub use normalize::{normalize, remove_doubles, resolve_auth};
pub use types::{AuthRef, BridgeConfig, ControlDocument, DocumentFormat, TargetConfig};
