use crate::storage::StorageError;
use std::fmt;
use std::path::PathBuf;

/// How a source delivers new posts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// The bridge calls `poll()` on an interval
    Polling,
    /// The source pushes posts through a sink from `listen()`
    Streaming,
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceMode::Polling => f.write_str("polling"),
            SourceMode::Streaming => f.write_str("streaming"),
        }
    }
}

/// Output of a converter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversion {
    /// Content in the target's format
    pub content: String,
    /// Local files the converter downloaded while converting
    pub images: Vec<PathBuf>,
}

impl Conversion {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<PathBuf>) -> Self {
        self.images = images;
        self
    }
}

/// What a target has to do with a post
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostAction {
    Ignore,
    Create,
    Update,
    Delete,
}

impl fmt::Display for PostAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PostAction::Ignore => "ignore",
            PostAction::Create => "create",
            PostAction::Update => "update",
            PostAction::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Errors raised by sources, targets and converters
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    /// The target can never accept this post; retrying is pointless
    #[error("invalid target resource: {message}")]
    InvalidTarget { message: String },

    #[error("source error: {message}")]
    Source {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("target error: {message}")]
    Target {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("converter error: {message}")]
    Converter {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("component config error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ComponentError {
    /// True when the failure must not be retried
    pub fn is_permanent(&self) -> bool {
        matches!(self, ComponentError::InvalidTarget { .. })
    }

    pub fn invalid_target(message: impl Into<String>) -> Self {
        ComponentError::InvalidTarget {
            message: message.into(),
        }
    }

    pub fn source_error(message: impl Into<String>) -> Self {
        ComponentError::Source {
            message: message.into(),
            source: None,
        }
    }

    pub fn target(message: impl Into<String>) -> Self {
        ComponentError::Target {
            message: message.into(),
            source: None,
        }
    }

    pub fn converter(message: impl Into<String>) -> Self {
        ComponentError::Converter {
            message: message.into(),
            source: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ComponentError::Config {
            message: message.into(),
        }
    }
}
