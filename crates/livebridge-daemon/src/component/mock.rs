//! Mock components for testing
//!
//! Clones share their state, so a test can keep one handle and give another
//! to a factory or bridge.

use super::post::{Post, SourceItem, SourcePost};
use super::registry::{ComponentRegistry, SourceFactory, TargetFactory};
use super::traits::{Converter, ErasedSource, ErasedTarget, PostSink, Source, Target};
use super::types::{ComponentError, Conversion, PostAction, SourceMode};
use chrono::{DateTime, TimeZone, Utc};
use livebridge_core::TargetDoc;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Mock source post with settable flags
#[derive(Debug, Clone)]
pub struct MockPost {
    pub id: String,
    pub source_id: String,
    pub source_type: String,
    pub data: Value,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub update: bool,
    pub deleted: bool,
    pub sticky: bool,
    /// Overrides the default classification when set
    pub action: Option<PostAction>,
}

impl MockPost {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            data: json!({ "id": id, "mimetype": "image/jpeg" }),
            id,
            source_id: "source-1".to_string(),
            source_type: "mock".to_string(),
            created: fixed_time(),
            updated: fixed_time(),
            update: false,
            deleted: false,
            sticky: false,
            action: None,
        }
    }

    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    pub fn updated(mut self) -> Self {
        self.update = true;
        self
    }

    pub fn sticky(mut self) -> Self {
        self.sticky = true;
        self
    }

    pub fn with_source_type(mut self, source_type: impl Into<String>) -> Self {
        self.source_type = source_type.into();
        self
    }

    pub fn with_updated_at(mut self, updated: DateTime<Utc>) -> Self {
        self.updated = updated;
        self
    }

    pub fn with_action(mut self, action: PostAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Wrap into a shared source item
    pub fn item(self) -> SourceItem {
        Arc::new(self)
    }
}

impl SourcePost for MockPost {
    fn id(&self) -> &str {
        &self.id
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn source_type(&self) -> &str {
        &self.source_type
    }

    fn data(&self) -> &Value {
        &self.data
    }

    fn created(&self) -> DateTime<Utc> {
        self.created
    }

    fn updated(&self) -> DateTime<Utc> {
        self.updated
    }

    fn is_update(&self) -> bool {
        self.update
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn is_sticky(&self) -> bool {
        self.sticky
    }

    fn classify(&self, known: bool) -> PostAction {
        self.action
            .unwrap_or_else(|| super::post::default_action(known, self.update, self.deleted))
    }
}

/// Record of source calls for test assertions
#[derive(Debug, Clone, PartialEq)]
pub enum MockSourceCall {
    Poll,
    Listen,
    Stop,
}

/// Mock source. Polls return queued batches, then empty batches.
#[derive(Debug, Clone)]
pub struct MockSource {
    mode: SourceMode,
    batches: Arc<Mutex<VecDeque<Result<Vec<SourceItem>, String>>>>,
    last_updated: Arc<Mutex<Option<DateTime<Utc>>>>,
    sink: Arc<Mutex<Option<PostSink>>>,
    stop_error: Option<String>,
    /// Track calls for verification
    pub call_log: Arc<Mutex<Vec<MockSourceCall>>>,
}

impl MockSource {
    pub fn new(mode: SourceMode) -> Self {
        Self {
            mode,
            batches: Arc::new(Mutex::new(VecDeque::new())),
            last_updated: Arc::new(Mutex::new(None)),
            sink: Arc::new(Mutex::new(None)),
            stop_error: None,
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a batch for the next poll
    pub fn with_batch(self, items: Vec<SourceItem>) -> Self {
        self.push_batch(items);
        self
    }

    /// Queue a failing poll
    pub fn with_poll_error(self, error: impl Into<String>) -> Self {
        lock(&self.batches).push_back(Err(error.into()));
        self
    }

    /// Make `stop()` fail
    pub fn with_stop_error(mut self, error: impl Into<String>) -> Self {
        self.stop_error = Some(error.into());
        self
    }

    pub fn push_batch(&self, items: Vec<SourceItem>) {
        lock(&self.batches).push_back(Ok(items));
    }

    /// Push posts through the sink captured by `listen()`.
    ///
    /// Returns false when the source is not listening.
    pub fn emit(&self, items: Vec<SourceItem>) -> bool {
        let sink = lock(&self.sink).clone();
        match sink {
            Some(sink) => {
                sink.send(items);
                true
            }
            None => false,
        }
    }

    /// Get a copy of the call log for assertions
    pub fn get_calls(&self) -> Vec<MockSourceCall> {
        lock(&self.call_log).clone()
    }

    pub fn count(&self, call: &MockSourceCall) -> usize {
        lock(&self.call_log).iter().filter(|c| *c == call).count()
    }

    fn log_call(&self, call: MockSourceCall) {
        lock(&self.call_log).push(call);
    }
}

impl Source for MockSource {
    fn source_type(&self) -> &str {
        "mock"
    }

    fn mode(&self) -> SourceMode {
        self.mode
    }

    fn last_updated(&self) -> Option<DateTime<Utc>> {
        *lock(&self.last_updated)
    }

    fn set_last_updated(&self, last_updated: Option<DateTime<Utc>>) {
        *lock(&self.last_updated) = last_updated;
    }

    async fn poll(&self) -> Result<Vec<SourceItem>, ComponentError> {
        self.log_call(MockSourceCall::Poll);
        match lock(&self.batches).pop_front() {
            Some(Ok(items)) => Ok(items),
            Some(Err(message)) => Err(ComponentError::source_error(message)),
            None => Ok(Vec::new()),
        }
    }

    async fn listen(&self, sink: PostSink) -> Result<(), ComponentError> {
        self.log_call(MockSourceCall::Listen);
        *lock(&self.sink) = Some(sink);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ComponentError> {
        self.log_call(MockSourceCall::Stop);
        lock(&self.sink).take();
        match &self.stop_error {
            Some(message) => Err(ComponentError::source_error(message.clone())),
            None => Ok(()),
        }
    }
}

/// Record of target calls for test assertions
#[derive(Debug, Clone, PartialEq)]
pub enum MockTargetCall {
    PostItem(String),
    UpdateItem(String),
    DeleteItem(String),
    HandleExtras(String),
}

/// Scripted failure of a target item call
#[derive(Debug, Clone, Copy, PartialEq)]
enum Failure {
    Transient,
    Permanent,
}

/// Mock target. Item calls succeed with `{"id": <post id>}` unless scripted
/// otherwise.
#[derive(Debug, Clone)]
pub struct MockTarget {
    target_id: String,
    target_type: String,
    failures: Arc<Mutex<VecDeque<Failure>>>,
    always_permanent: bool,
    empty_results: bool,
    delete_result: bool,
    extras: Option<Value>,
    delay: Option<Duration>,
    /// Track calls for verification
    pub call_log: Arc<Mutex<Vec<MockTargetCall>>>,
    /// Time of every item call (post, update, delete)
    pub attempts: Arc<Mutex<Vec<Instant>>>,
}

impl MockTarget {
    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            target_type: "mock".to_string(),
            failures: Arc::new(Mutex::new(VecDeque::new())),
            always_permanent: false,
            empty_results: false,
            delete_result: true,
            extras: None,
            delay: None,
            call_log: Arc::new(Mutex::new(Vec::new())),
            attempts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_type(mut self, target_type: impl Into<String>) -> Self {
        self.target_type = target_type.into();
        self
    }

    /// Fail the next `times` item calls with a transient error
    pub fn failing_times(self, times: usize) -> Self {
        lock(&self.failures).extend(std::iter::repeat_n(Failure::Transient, times));
        self
    }

    /// Fail the next item call with a permanent error
    pub fn failing_permanently_once(self) -> Self {
        lock(&self.failures).push_back(Failure::Permanent);
        self
    }

    /// Fail every item call with a permanent error
    pub fn invalid(mut self) -> Self {
        self.always_permanent = true;
        self
    }

    /// Return empty results from post/update
    pub fn with_empty_results(mut self) -> Self {
        self.empty_results = true;
        self
    }

    pub fn with_delete_result(mut self, deleted: bool) -> Self {
        self.delete_result = deleted;
        self
    }

    /// Document returned by `handle_extras`
    pub fn with_extras(mut self, doc: Value) -> Self {
        self.extras = Some(doc);
        self
    }

    /// Delay every item call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get a copy of the call log for assertions
    pub fn get_calls(&self) -> Vec<MockTargetCall> {
        lock(&self.call_log).clone()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        lock(&self.attempts).clone()
    }

    pub fn attempt_count(&self) -> usize {
        lock(&self.attempts).len()
    }

    fn log_call(&self, call: MockTargetCall) {
        lock(&self.call_log).push(call);
    }

    async fn item_call(&self, call: MockTargetCall) -> Result<(), ComponentError> {
        self.log_call(call);
        lock(&self.attempts).push(Instant::now());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.always_permanent {
            return Err(ComponentError::invalid_target(format!(
                "{} rejects everything",
                self.target_id
            )));
        }
        let failure = lock(&self.failures).pop_front();
        match failure {
            Some(Failure::Transient) => Err(ComponentError::target("scripted transient failure")),
            Some(Failure::Permanent) => Err(ComponentError::invalid_target("scripted permanent failure")),
            None => Ok(()),
        }
    }

    fn result_doc(&self, post: &Post) -> Option<TargetDoc> {
        if self.empty_results {
            None
        } else {
            Some(TargetDoc::new(json!({ "id": post.id() })))
        }
    }
}

impl Target for MockTarget {
    fn target_type(&self) -> &str {
        &self.target_type
    }

    fn target_id(&self) -> &str {
        &self.target_id
    }

    async fn post_item(&self, post: &Post) -> Result<Option<TargetDoc>, ComponentError> {
        self.item_call(MockTargetCall::PostItem(post.id().to_string()))
            .await?;
        Ok(self.result_doc(post))
    }

    async fn update_item(&self, post: &Post) -> Result<Option<TargetDoc>, ComponentError> {
        self.item_call(MockTargetCall::UpdateItem(post.id().to_string()))
            .await?;
        Ok(self.result_doc(post))
    }

    async fn delete_item(&self, post: &Post) -> Result<bool, ComponentError> {
        self.item_call(MockTargetCall::DeleteItem(post.id().to_string()))
            .await?;
        Ok(self.delete_result)
    }

    async fn handle_extras(&self, post: &Post) -> Result<Option<TargetDoc>, ComponentError> {
        self.log_call(MockTargetCall::HandleExtras(post.id().to_string()));
        Ok(self.extras.clone().map(TargetDoc::new))
    }
}

/// Record of converter calls for test assertions
#[derive(Debug, Clone, PartialEq)]
pub enum MockConverterCall {
    Convert,
    RemoveImages(Vec<PathBuf>),
}

/// Mock converter returning fixed content and images
#[derive(Debug, Clone)]
pub struct MockConverter {
    content: String,
    images: Vec<PathBuf>,
    error: Option<String>,
    cleanup_error: Option<String>,
    /// Track calls for verification
    pub call_log: Arc<Mutex<Vec<MockConverterCall>>>,
}

impl MockConverter {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            images: Vec::new(),
            error: None,
            cleanup_error: None,
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_images(mut self, images: Vec<PathBuf>) -> Self {
        self.images = images;
        self
    }

    /// Make `convert()` fail
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Make `remove_images()` fail
    pub fn with_cleanup_error(mut self, error: impl Into<String>) -> Self {
        self.cleanup_error = Some(error.into());
        self
    }

    /// Get a copy of the call log for assertions
    pub fn get_calls(&self) -> Vec<MockConverterCall> {
        lock(&self.call_log).clone()
    }
}

impl Converter for MockConverter {
    async fn convert(&self, _data: &Value) -> Result<Conversion, ComponentError> {
        lock(&self.call_log).push(MockConverterCall::Convert);
        if let Some(err) = &self.error {
            return Err(ComponentError::converter(err.clone()));
        }
        Ok(Conversion::new(self.content.clone()).with_images(self.images.clone()))
    }

    async fn remove_images(&self, images: &[PathBuf]) -> Result<(), ComponentError> {
        lock(&self.call_log).push(MockConverterCall::RemoveImages(images.to_vec()));
        match &self.cleanup_error {
            Some(err) => Err(ComponentError::converter(err.clone())),
            None => Ok(()),
        }
    }
}

/// Registry serving mocks under the "mock" type key.
///
/// Sources are picked by the bridge's `source_id`, targets by their
/// `target_id`. An id without a mock is a config error.
pub fn mock_registry(sources: &[(&str, MockSource)], targets: &[MockTarget]) -> ComponentRegistry {
    let sources: HashMap<String, MockSource> = sources
        .iter()
        .map(|(id, source)| (id.to_string(), source.clone()))
        .collect();
    let targets: HashMap<String, MockTarget> = targets
        .iter()
        .map(|target| (target.target_id.clone(), target.clone()))
        .collect();

    let mut registry = ComponentRegistry::new();
    registry.register_source(SourceFactory {
        name: "mock".to_string(),
        description: "Scripted source for tests".to_string(),
        create: Arc::new(move |config| {
            let id = config.source_id.as_deref().unwrap_or_default();
            match sources.get(id) {
                Some(source) => Ok(Arc::new(source.clone()) as Arc<dyn ErasedSource>),
                None => Err(ComponentError::config(format!("no mock source '{id}'"))),
            }
        }),
    });
    registry.register_target(TargetFactory {
        name: "mock".to_string(),
        description: "Scripted target for tests".to_string(),
        create: Arc::new(move |config| {
            let id = config.target_id.as_deref().unwrap_or_default();
            match targets.get(id) {
                Some(target) => Ok(Arc::new(target.clone()) as Arc<dyn ErasedTarget>),
                None => Err(ComponentError::config(format!("no mock target '{id}'"))),
            }
        }),
    });
    registry
}
