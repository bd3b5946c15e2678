//! A running bridge: one source, its targets and their delivery queue

use super::delay::cancellable_sleep;
use super::dispatch::Dispatcher;
use super::queue::{DistributionQueue, QueueStats, RetryPolicy};
use crate::component::{
    ComponentError, ComponentRegistry, ErasedSource, ErasedTarget, Post, PostSink, SourceItem,
    SourceMode,
};
use crate::storage::ErasedStorage;
use livebridge_core::{BridgeConfig, Fingerprint};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Settings shared by every bridge the controller builds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Poll interval of bridges that do not set their own
    pub default_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct Bridge {
    fingerprint: Fingerprint,
    config: BridgeConfig,
    name: String,
    source: Arc<dyn ErasedSource>,
    targets: Vec<Arc<dyn ErasedTarget>>,
    storage: Arc<dyn ErasedStorage>,
    queue: DistributionQueue,
    interval: Duration,
    cancel: CancellationToken,
    source_stopped: AtomicBool,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("name", &self.name)
            .field("fingerprint", &self.fingerprint.short())
            .field("targets", &self.targets.len())
            .field("queue", &self.queue)
            .finish()
    }
}

impl Bridge {
    /// Build a bridge from its config.
    ///
    /// The source and every target are created through `registry`. The
    /// bridge's token is a child of `parent`; its queue's token a child of
    /// the bridge's.
    ///
    /// # Errors
    ///
    /// Returns the first factory error.
    pub fn build(
        config: &BridgeConfig,
        registry: &Arc<ComponentRegistry>,
        storage: Arc<dyn ErasedStorage>,
        options: &BridgeOptions,
        parent: &CancellationToken,
    ) -> Result<Arc<Self>, ComponentError> {
        let source = registry.create_source(config)?;
        let targets = config
            .targets
            .iter()
            .map(|target| registry.create_target(target))
            .collect::<Result<Vec<_>, _>>()?;

        let name = config
            .label
            .clone()
            .or_else(|| config.source_id.clone())
            .unwrap_or_else(|| config.source_type.clone());
        let cancel = parent.child_token();
        let queue = DistributionQueue::new(
            name.clone(),
            Dispatcher::new(Arc::clone(&storage), Arc::clone(registry)),
            options.retry,
            cancel.child_token(),
        );

        Ok(Arc::new(Self {
            fingerprint: config.fingerprint(),
            config: config.clone(),
            name,
            source,
            targets,
            storage,
            queue,
            interval: config.interval_or(options.default_interval),
            cancel,
            source_stopped: AtomicBool::new(false),
        }))
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Label, source id or source type, whichever is set first
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> SourceMode {
        self.source.mode()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn targets(&self) -> &[Arc<dyn ErasedTarget>] {
        &self.targets
    }

    pub fn source(&self) -> &Arc<dyn ErasedSource> {
        &self.source
    }

    pub fn queue(&self) -> &DistributionQueue {
        &self.queue
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Poll the source once and queue what it returned
    pub async fn check_posts(&self) {
        if self.source.last_updated().is_none() {
            self.seed_last_updated().await;
        }

        match self.source.poll().await {
            Ok(items) => self.new_posts(items),
            Err(e) => error!("Error polling {}: {}", self.name, e),
        }
    }

    async fn seed_last_updated(&self) {
        let Some(source_id) = self.config.source_id.as_deref() else {
            return;
        };
        match self.storage.get_last_updated(source_id).await {
            Ok(Some(last_updated)) => {
                debug!("Last updated of {} from storage: {}", source_id, last_updated);
                self.source.set_last_updated(Some(last_updated));
            }
            Ok(None) => {}
            Err(e) => warn!("Could not load last updated of {}: {}", source_id, e),
        }
    }

    /// Queue every post for every target and advance the source's
    /// `last_updated` to the newest post
    pub fn new_posts(&self, items: Vec<SourceItem>) {
        if items.is_empty() {
            return;
        }
        info!("{} new post(s) from {}", items.len(), self.name);

        let mut newest = self.source.last_updated();
        for item in items {
            let updated = item.updated();
            newest = Some(newest.map_or(updated, |n| n.max(updated)));

            let post = Post::new(item);
            for target in &self.targets {
                self.queue.enqueue(post.fork(), Arc::clone(target));
            }
        }
        self.source.set_last_updated(newest);
    }

    /// Sink handed to a streaming source.
    ///
    /// Holds the bridge weakly; posts arriving after the bridge is gone are
    /// dropped.
    pub fn post_sink(self: &Arc<Self>) -> PostSink {
        let bridge: Weak<Self> = Arc::downgrade(self);
        PostSink::new(move |items| match bridge.upgrade() {
            Some(bridge) if !bridge.is_stopped() => bridge.new_posts(items),
            _ => debug!("Bridge gone, dropping {} streamed post(s)", items.len()),
        })
    }

    /// Cancel the supervisor and every pending retry. Idempotent.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!("Stopping bridge {}", self.name);
        }
        self.cancel.cancel();
        self.queue.stop();
    }

    /// Call `stop()` on the source unless already done
    pub async fn stop_source(&self) {
        if self.source_stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.source.stop().await {
            warn!("Error stopping source of {}: {}", self.name, e);
        }
    }

    /// Run the supervisor matching the source's mode until stopped
    pub async fn run(self: Arc<Self>) {
        match self.mode() {
            SourceMode::Polling => self.run_poller().await,
            SourceMode::Streaming => self.run_stream().await,
        }
    }

    /// Poll, queue, sleep for the interval, repeat until stopped
    pub async fn run_poller(self: Arc<Self>) {
        info!("Starting poller for {} every {:?}", self.name, self.interval);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.check_posts() => {}
            }
            if !cancellable_sleep(self.interval, &self.cancel).await {
                break;
            }
        }
        self.teardown().await;
    }

    /// Listen in the background and idle until stopped
    pub async fn run_stream(self: Arc<Self>) {
        info!("Starting stream listener for {}", self.name);
        let sink = self.post_sink();
        let source = Arc::clone(&self.source);
        let name = self.name.clone();
        let listener = tokio::spawn(async move {
            if let Err(e) = source.listen(sink).await {
                error!("Stream of {} failed: {}", name, e);
            }
        });

        self.cancel.cancelled().await;
        self.stop_source().await;
        listener.abort();
        self.teardown().await;
    }

    async fn teardown(&self) {
        self.stop();
        self.stop_source().await;
        self.queue.closed().await;
        info!("Bridge {} stopped", self.name);
    }
}
