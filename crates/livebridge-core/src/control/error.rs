use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, normalizing or saving control data
#[derive(Debug, Error)]
pub enum ControlError {
    /// Control file does not exist
    #[error("Control file not found: {path}")]
    NotFound { path: PathBuf },

    /// File I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Document could not be parsed
    #[error("Failed to parse control document: {message}")]
    Parse { message: String },

    /// Document could not be serialized
    #[error("Failed to serialize control document: {message}")]
    Serialize { message: String },

    /// A target references credentials that the document does not define
    #[error("Data for user [{name}] not found in control document")]
    UnknownAuth { name: String },

    /// The storage backend holding the control data failed
    #[error("Control storage error: {message}")]
    Storage { message: String },

    /// No control data is available at the configured location
    #[error("No control data available at {location}")]
    Empty { location: String },
}
