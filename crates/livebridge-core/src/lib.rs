//! Core types for livebridge
//!
//! This crate holds everything about livebridge that does not need a runtime:
//!
//! - daemon settings and their resolution from file, environment and CLI
//! - the control document (bridges, targets, named credentials), including
//!   normalization, fingerprinting and cycle-over-cycle diffing
//! - the persisted sync record schema
//! - logging initialization shared by the binaries

pub mod config;
pub mod control;
pub mod hash;
pub mod logging;
pub mod schema;

pub use control::{BridgeConfig, ControlDocument, Fingerprint, TargetConfig};
pub use schema::{SyncRecord, TargetDoc};

// Re-export serde_json so adapters share the payload type
pub use serde_json;
