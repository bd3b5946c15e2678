//! Source, target and converter traits
//!
//! Each trait uses RPITIT with explicit `Send` bounds and has an object-safe
//! `Erased*` twin, implemented for every implementor, that the registry and
//! the bridges hold behind `Arc<dyn ..>`.

use super::post::{Post, SourceItem};
use super::types::{ComponentError, Conversion, SourceMode};
use chrono::{DateTime, Utc};
use livebridge_core::TargetDoc;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tracing::info;

/// Boxed future returned by the erased traits
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Callback a streaming source hands new posts to
#[derive(Clone)]
pub struct PostSink {
    deliver: Arc<dyn Fn(Vec<SourceItem>) + Send + Sync>,
}

impl PostSink {
    pub fn new(deliver: impl Fn(Vec<SourceItem>) + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Hand a batch of new posts to the bridge
    pub fn send(&self, items: Vec<SourceItem>) {
        (self.deliver)(items)
    }
}

impl fmt::Debug for PostSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostSink").finish_non_exhaustive()
    }
}

/// A place posts come from.
///
/// Polling sources implement [`Source::poll`], streaming sources implement
/// [`Source::listen`] and [`Source::stop`]; [`Source::mode`] tells the bridge
/// which supervisor to run.
pub trait Source: Send + Sync {
    /// Type key this source was registered under
    fn source_type(&self) -> &str;

    fn mode(&self) -> SourceMode;

    /// Timestamp of the newest post already handed to the bridge
    fn last_updated(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn set_last_updated(&self, _last_updated: Option<DateTime<Utc>>) {}

    /// Fetch posts that appeared since the last poll
    fn poll(&self) -> impl Future<Output = Result<Vec<SourceItem>, ComponentError>> + Send {
        async { Err(ComponentError::config("source does not support polling")) }
    }

    /// Open the stream and hand every batch of posts to `sink`
    fn listen(&self, _sink: PostSink) -> impl Future<Output = Result<(), ComponentError>> + Send {
        async { Err(ComponentError::config("source does not support streaming")) }
    }

    /// Close the stream
    fn stop(&self) -> impl Future<Output = Result<(), ComponentError>> + Send {
        async { Ok(()) }
    }
}

/// Object-safe version of [`Source`]
pub trait ErasedSource: Send + Sync {
    fn source_type(&self) -> &str;
    fn mode(&self) -> SourceMode;
    fn last_updated(&self) -> Option<DateTime<Utc>>;
    fn set_last_updated(&self, last_updated: Option<DateTime<Utc>>);
    fn poll<'a>(&'a self) -> BoxFuture<'a, Result<Vec<SourceItem>, ComponentError>>;
    fn listen<'a>(&'a self, sink: PostSink) -> BoxFuture<'a, Result<(), ComponentError>>;
    fn stop<'a>(&'a self) -> BoxFuture<'a, Result<(), ComponentError>>;
}

impl<T: Source> ErasedSource for T {
    fn source_type(&self) -> &str {
        Source::source_type(self)
    }

    fn mode(&self) -> SourceMode {
        Source::mode(self)
    }

    fn last_updated(&self) -> Option<DateTime<Utc>> {
        Source::last_updated(self)
    }

    fn set_last_updated(&self, last_updated: Option<DateTime<Utc>>) {
        Source::set_last_updated(self, last_updated)
    }

    fn poll<'a>(&'a self) -> BoxFuture<'a, Result<Vec<SourceItem>, ComponentError>> {
        Box::pin(Source::poll(self))
    }

    fn listen<'a>(&'a self, sink: PostSink) -> BoxFuture<'a, Result<(), ComponentError>> {
        Box::pin(Source::listen(self, sink))
    }

    fn stop<'a>(&'a self) -> BoxFuture<'a, Result<(), ComponentError>> {
        Box::pin(Source::stop(self))
    }
}

/// A service posts are delivered to.
///
/// `Ok(None)` (or an empty document) from the item methods means the remote
/// call did not succeed but is not worth retrying. Return
/// [`ComponentError::InvalidTarget`] when the resource can never accept the
/// post, and any other error to have the delivery retried.
pub trait Target: Send + Sync {
    /// Type key this target was registered under
    fn target_type(&self) -> &str;

    /// Id of this target, used as the sync record key
    fn target_id(&self) -> &str;

    fn post_item(
        &self,
        post: &Post,
    ) -> impl Future<Output = Result<Option<TargetDoc>, ComponentError>> + Send;

    fn update_item(
        &self,
        post: &Post,
    ) -> impl Future<Output = Result<Option<TargetDoc>, ComponentError>> + Send;

    fn delete_item(&self, post: &Post) -> impl Future<Output = Result<bool, ComponentError>> + Send;

    /// Follow-up work after create/update, e.g. pinning sticky posts
    fn handle_extras(
        &self,
        _post: &Post,
    ) -> impl Future<Output = Result<Option<TargetDoc>, ComponentError>> + Send {
        async { Ok(None) }
    }
}

/// Object-safe version of [`Target`]
pub trait ErasedTarget: Send + Sync {
    fn target_type(&self) -> &str;
    fn target_id(&self) -> &str;
    fn post_item<'a>(
        &'a self,
        post: &'a Post,
    ) -> BoxFuture<'a, Result<Option<TargetDoc>, ComponentError>>;
    fn update_item<'a>(
        &'a self,
        post: &'a Post,
    ) -> BoxFuture<'a, Result<Option<TargetDoc>, ComponentError>>;
    fn delete_item<'a>(&'a self, post: &'a Post) -> BoxFuture<'a, Result<bool, ComponentError>>;
    fn handle_extras<'a>(
        &'a self,
        post: &'a Post,
    ) -> BoxFuture<'a, Result<Option<TargetDoc>, ComponentError>>;
}

impl<T: Target> ErasedTarget for T {
    fn target_type(&self) -> &str {
        Target::target_type(self)
    }

    fn target_id(&self) -> &str {
        Target::target_id(self)
    }

    fn post_item<'a>(
        &'a self,
        post: &'a Post,
    ) -> BoxFuture<'a, Result<Option<TargetDoc>, ComponentError>> {
        Box::pin(Target::post_item(self, post))
    }

    fn update_item<'a>(
        &'a self,
        post: &'a Post,
    ) -> BoxFuture<'a, Result<Option<TargetDoc>, ComponentError>> {
        Box::pin(Target::update_item(self, post))
    }

    fn delete_item<'a>(&'a self, post: &'a Post) -> BoxFuture<'a, Result<bool, ComponentError>> {
        Box::pin(Target::delete_item(self, post))
    }

    fn handle_extras<'a>(
        &'a self,
        post: &'a Post,
    ) -> BoxFuture<'a, Result<Option<TargetDoc>, ComponentError>> {
        Box::pin(Target::handle_extras(self, post))
    }
}

/// Translates a source payload into a target's format
pub trait Converter: Send + Sync {
    fn convert(&self, data: &Value) -> impl Future<Output = Result<Conversion, ComponentError>> + Send;

    /// Delete images downloaded during conversion
    fn remove_images(
        &self,
        images: &[PathBuf],
    ) -> impl Future<Output = Result<(), ComponentError>> + Send {
        async move {
            for path in images {
                tokio::fs::remove_file(path).await.map_err(|e| ComponentError::Converter {
                    message: format!("failed to remove image {}", path.display()),
                    source: Some(Box::new(e)),
                })?;
                info!("Removed image {}", path.display());
            }
            Ok(())
        }
    }
}

/// Object-safe version of [`Converter`]
pub trait ErasedConverter: Send + Sync {
    fn convert<'a>(&'a self, data: &'a Value) -> BoxFuture<'a, Result<Conversion, ComponentError>>;
    fn remove_images<'a>(&'a self, images: &'a [PathBuf]) -> BoxFuture<'a, Result<(), ComponentError>>;
}

impl<T: Converter> ErasedConverter for T {
    fn convert<'a>(&'a self, data: &'a Value) -> BoxFuture<'a, Result<Conversion, ComponentError>> {
        Box::pin(Converter::convert(self, data))
    }

    fn remove_images<'a>(&'a self, images: &'a [PathBuf]) -> BoxFuture<'a, Result<(), ComponentError>> {
        Box::pin(Converter::remove_images(self, images))
    }
}
