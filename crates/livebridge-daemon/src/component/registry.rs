//! Component registry: type keys to factories
//!
//! Sources and targets are looked up by the `type` field of their control
//! document entry; converters by the (source type, target type) pair.

use super::traits::{ErasedConverter, ErasedSource, ErasedTarget};
use super::types::ComponentError;
use livebridge_core::{BridgeConfig, TargetConfig};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A factory function that creates a source from its bridge config
pub type SourceFactoryFn =
    Arc<dyn Fn(&BridgeConfig) -> Result<Arc<dyn ErasedSource>, ComponentError> + Send + Sync>;

/// A factory function that creates a target from its config
pub type TargetFactoryFn =
    Arc<dyn Fn(&TargetConfig) -> Result<Arc<dyn ErasedTarget>, ComponentError> + Send + Sync>;

/// A factory that can create a source instance
#[derive(Clone)]
pub struct SourceFactory {
    /// Type key (e.g., "jsonfile")
    pub name: String,
    /// Human-readable description
    pub description: String,
    pub create: SourceFactoryFn,
}

impl fmt::Debug for SourceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFactory")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("create", &"<factory_fn>")
            .finish()
    }
}

/// A factory that can create a target instance
#[derive(Clone)]
pub struct TargetFactory {
    /// Type key (e.g., "log")
    pub name: String,
    /// Human-readable description
    pub description: String,
    pub create: TargetFactoryFn,
}

impl fmt::Debug for TargetFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetFactory")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("create", &"<factory_fn>")
            .finish()
    }
}

/// Registry of source and target factories and converters
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    sources: HashMap<String, SourceFactory>,
    targets: HashMap<String, TargetFactory>,
    converters: HashMap<(String, String), Arc<dyn ErasedConverter>>,
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("sources", &self.list_sources())
            .field("targets", &self.list_targets())
            .field("converters", &self.converters.len())
            .finish()
    }
}

impl ComponentRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in components registered
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::builtin::register_builtins(&mut registry);
        registry
    }

    /// Register a source factory, replacing one with the same name
    pub fn register_source(&mut self, factory: SourceFactory) {
        self.sources.insert(factory.name.clone(), factory);
    }

    /// Register a target factory, replacing one with the same name
    pub fn register_target(&mut self, factory: TargetFactory) {
        self.targets.insert(factory.name.clone(), factory);
    }

    /// Register the converter used from `source_type` posts to `target_type`
    pub fn register_converter(
        &mut self,
        source_type: impl Into<String>,
        target_type: impl Into<String>,
        converter: Arc<dyn ErasedConverter>,
    ) {
        self.converters
            .insert((source_type.into(), target_type.into()), converter);
    }

    /// Create the source of a bridge
    ///
    /// # Errors
    ///
    /// Returns `ComponentError::Config` if the source type is not registered,
    /// or whatever the factory returns.
    pub fn create_source(
        &self,
        config: &BridgeConfig,
    ) -> Result<Arc<dyn ErasedSource>, ComponentError> {
        let factory = self.sources.get(&config.source_type).ok_or_else(|| {
            ComponentError::config(format!("source type '{}' not registered", config.source_type))
        })?;
        (factory.create)(config)
    }

    /// Create one target of a bridge
    ///
    /// # Errors
    ///
    /// Returns `ComponentError::Config` if the target type is not registered,
    /// or whatever the factory returns.
    pub fn create_target(
        &self,
        config: &TargetConfig,
    ) -> Result<Arc<dyn ErasedTarget>, ComponentError> {
        let factory = self.targets.get(&config.target_type).ok_or_else(|| {
            ComponentError::config(format!("target type '{}' not registered", config.target_type))
        })?;
        (factory.create)(config)
    }

    /// Converter for posts of `source_type` delivered to `target_type`
    pub fn converter(
        &self,
        source_type: &str,
        target_type: &str,
    ) -> Option<Arc<dyn ErasedConverter>> {
        self.converters
            .get(&(source_type.to_string(), target_type.to_string()))
            .cloned()
    }

    /// List registered source types
    pub fn list_sources(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sources.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// List registered target types
    pub fn list_targets(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.targets.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn has_target(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    /// Number of registered factories and converters
    pub fn len(&self) -> usize {
        self.sources.len() + self.targets.len() + self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
