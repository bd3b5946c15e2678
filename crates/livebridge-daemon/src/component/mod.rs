//! Sources, targets and converters
//!
//! Adapters are looked up by type key in a [`ComponentRegistry`] when a
//! bridge is built.

pub mod builtin;
pub mod mock;
pub mod post;
pub mod registry;
pub mod traits;
pub mod types;

pub use builtin::{JsonFileSource, JsonPost, LogTarget, register_builtins};
pub use mock::{
    MockConverter, MockConverterCall, MockPost, MockSource, MockSourceCall, MockTarget,
    MockTargetCall, mock_registry,
};
pub use post::{Post, SourceItem, SourcePost, default_action};
pub use registry::{
    ComponentRegistry, SourceFactory, SourceFactoryFn, TargetFactory, TargetFactoryFn,
};
pub use traits::{
    BoxFuture, Converter, ErasedConverter, ErasedSource, ErasedTarget, PostSink, Source, Target,
};
pub use types::{ComponentError, Conversion, PostAction, SourceMode};
