//! Per-bridge delivery queue with bounded linear-backoff retry
//!
//! One consumer task per queue, started on the first enqueue, pulls items in
//! FIFO order and spawns a dispatch task for each without waiting for it.
//! A failed dispatch is retried after `multiplier * attempts` unless the
//! failure is permanent or the item already used up its attempts.

use super::delay::cancellable_sleep;
use super::dispatch::Dispatcher;
use crate::component::{ErasedTarget, Post};
use livebridge_core::config::RetrySettings;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Retry policy of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Backoff unit; the n-th retry waits `multiplier * n`
    pub multiplier: Duration,
    /// Attempts after which a failing item is dropped
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Delay before the retry numbered `attempts`
    pub fn delay(&self, attempts: u32) -> Duration {
        self.multiplier.saturating_mul(attempts)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            multiplier: settings.multiplier(),
            max_retries: settings.max_retries,
        }
    }
}

/// One post bound for one target
pub struct QueueItem {
    pub post: Post,
    pub target: Arc<dyn ErasedTarget>,
    /// Retries scheduled so far; never exceeds the policy's `max_retries`
    pub attempts: u32,
}

impl fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueItem")
            .field("post", &self.post.id())
            .field("target", &self.target.target_id())
            .field("attempts", &self.attempts)
            .finish()
    }
}

/// Outcome counters of a queue
#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    rejected: AtomicU64,
    retried: AtomicU64,
    aborted: AtomicU64,
}

/// Snapshot of a queue's outcome counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Dispatches that completed
    pub delivered: u64,
    /// Items dropped because of a permanent failure
    pub rejected: u64,
    /// Retries scheduled
    pub retried: u64,
    /// Items dropped after using up their attempts
    pub aborted: u64,
}

/// State shared by the consumer and the dispatch tasks
struct Shared {
    label: String,
    dispatcher: Dispatcher,
    policy: RetryPolicy,
    cancel: CancellationToken,
    tracker: TaskTracker,
    counters: Counters,
    /// Items accepted and not yet resolved
    pending: AtomicUsize,
    idle: Notify,
}

impl Shared {
    fn resolve(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Delivery queue of one bridge
pub struct DistributionQueue {
    shared: Arc<Shared>,
    sender: Mutex<Option<mpsc::UnboundedSender<QueueItem>>>,
    stopped: AtomicBool,
}

impl fmt::Debug for DistributionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributionQueue")
            .field("label", &self.shared.label)
            .field("pending", &self.pending())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl DistributionQueue {
    /// Create a queue; `cancel` should be a child of the owning bridge's token
    pub fn new(
        label: impl Into<String>,
        dispatcher: Dispatcher,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                label: label.into(),
                dispatcher,
                policy,
                cancel,
                tracker: TaskTracker::new(),
                counters: Counters::default(),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
            sender: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Queue `post` for delivery to `target`
    pub fn enqueue(&self, post: Post, target: Arc<dyn ErasedTarget>) {
        let item = QueueItem {
            post,
            target,
            attempts: 0,
        };
        if self.is_stopped() || self.shared.cancel.is_cancelled() {
            debug!("Queue {} stopped, dropping {:?}", self.shared.label, item);
            return;
        }

        let mut sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let tx = sender.get_or_insert_with(|| start_consumer(&self.shared));
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if let Err(mpsc::error::SendError(item)) = tx.send(item) {
            warn!("Queue {} closed, dropping {:?}", self.shared.label, item);
            self.shared.resolve();
        }
    }

    /// True once the consumer task was started
    pub fn is_started(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Items accepted and not yet delivered, rejected or aborted
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.shared.counters;
        QueueStats {
            delivered: c.delivered.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            aborted: c.aborted.load(Ordering::Relaxed),
        }
    }

    /// Wait until every accepted item is resolved.
    ///
    /// Returns false if `timeout` elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let shared = &self.shared;
        let wait_idle = async {
            loop {
                let idle = shared.idle.notified();
                if shared.pending.load(Ordering::Acquire) == 0 {
                    break;
                }
                idle.await;
            }
        };
        tokio::time::timeout(timeout, wait_idle).await.is_ok()
    }

    /// Cancel every pending retry delay and the consumer.
    ///
    /// Dispatches already running finish on their own; queued items are
    /// dropped. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Stopping queue {}", self.shared.label);
        self.shared.cancel.cancel();
        self.shared.tracker.close();
    }

    /// Wait for queued items to be delivered (bounded by `timeout`), then stop
    /// and wait for in-flight dispatches to finish.
    pub async fn drain_and_stop(&self, timeout: Duration) -> bool {
        let drained = self.drain(timeout).await;
        if !drained {
            warn!(
                "Queue {} not drained after {:?}, {} item(s) dropped",
                self.shared.label,
                timeout,
                self.pending()
            );
        }
        self.stop();
        self.closed().await;
        drained
    }

    /// Wait until the consumer and every dispatch task have exited
    pub async fn closed(&self) {
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
    }
}

impl Drop for DistributionQueue {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

fn start_consumer(shared: &Arc<Shared>) -> mpsc::UnboundedSender<QueueItem> {
    let (tx, rx) = mpsc::unbounded_channel();
    debug!("Starting queue consumer for {}", shared.label);
    shared
        .tracker
        .spawn(consume(rx, tx.clone(), Arc::clone(shared)));
    tx
}

async fn consume(
    mut rx: mpsc::UnboundedReceiver<QueueItem>,
    tx: mpsc::UnboundedSender<QueueItem>,
    shared: Arc<Shared>,
) {
    loop {
        let item = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        shared
            .tracker
            .spawn(process(item, tx.clone(), Arc::clone(&shared)));
    }
    debug!("Queue consumer for {} stopped", shared.label);
}

async fn process(mut item: QueueItem, tx: mpsc::UnboundedSender<QueueItem>, shared: Arc<Shared>) {
    let result = shared
        .dispatcher
        .dispatch(item.target.as_ref(), &mut item.post)
        .await;

    match result {
        Ok(action) => {
            shared.counters.delivered.fetch_add(1, Ordering::Relaxed);
            info!(
                "Post {} distributed to {} [{}] ({})",
                item.post.id(),
                item.target.target_id(),
                item.attempts,
                action
            );
            shared.resolve();
        }
        Err(e) if e.is_permanent() => {
            shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Post {} rejected by {}, not retrying: {}",
                item.post.id(),
                item.target.target_id(),
                e
            );
            shared.resolve();
        }
        Err(e) if item.attempts >= shared.policy.max_retries => {
            shared.counters.aborted.fetch_add(1, Ordering::Relaxed);
            info!(
                "Distribution aborted: {} {} [{}]: {}",
                item.post.id(),
                item.target.target_id(),
                item.attempts,
                e
            );
            shared.resolve();
        }
        Err(e) => {
            item.attempts += 1;
            shared.counters.retried.fetch_add(1, Ordering::Relaxed);
            let delay = shared.policy.delay(item.attempts);
            error!(
                "Target action failed, will retry in {:?}: [{}] {} {} [{}]",
                delay,
                item.attempts,
                item.post.id(),
                item.target.target_id(),
                e
            );

            if !cancellable_sleep(delay, &shared.cancel).await {
                debug!("Retry of {:?} cancelled", item);
                shared.resolve();
                return;
            }
            if let Err(mpsc::error::SendError(item)) = tx.send(item) {
                debug!("Queue {} closed, dropping retry of {:?}", shared.label, item);
                shared.resolve();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentRegistry, MockPost, MockTarget};
    use crate::storage::{ErasedStorage, MemoryStorage};

    const MULTIPLIER: Duration = Duration::from_secs(5);

    fn queue_with(storage: Arc<dyn ErasedStorage>, max_retries: u32) -> DistributionQueue {
        let dispatcher = Dispatcher::new(storage, Arc::new(ComponentRegistry::new()));
        DistributionQueue::new(
            "test-bridge",
            dispatcher,
            RetryPolicy {
                multiplier: MULTIPLIER,
                max_retries,
            },
            CancellationToken::new(),
        )
    }

    fn queue(max_retries: u32) -> DistributionQueue {
        queue_with(Arc::new(MemoryStorage::new()), max_retries)
    }

    fn post(id: &str) -> Post {
        Post::new(MockPost::new(id).item())
    }

    fn gaps(target: &MockTarget) -> Vec<Duration> {
        target
            .attempt_times()
            .windows(2)
            .map(|w| w[1] - w[0])
            .collect()
    }

    #[test]
    fn test_policy_delay_is_linear() {
        let policy = RetryPolicy {
            multiplier: Duration::from_millis(250),
            max_retries: 3,
        };
        assert_eq!(policy.delay(1), Duration::from_millis(250));
        assert_eq!(policy.delay(3), Duration::from_millis(750));
        assert_eq!(RetryPolicy::default().max_retries, 10);
    }

    #[test]
    fn test_policy_delay_saturates() {
        let policy = RetryPolicy {
            multiplier: Duration::from_secs(u64::MAX / 2),
            max_retries: 10,
        };
        assert_eq!(policy.delay(3), Duration::MAX);
    }

    // ========================================================================
    // Consumer lifecycle
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_consumer_starts_on_first_enqueue() {
        let queue = queue(10);
        assert!(!queue.is_started());

        let target = MockTarget::new("t1");
        queue.enqueue(post("p1"), Arc::new(target.clone()));
        assert!(queue.is_started());

        assert!(queue.drain(Duration::from_secs(1)).await);
        assert_eq!(target.attempt_count(), 1);
        assert_eq!(queue.stats().delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_stop_is_dropped() {
        let queue = queue(10);
        queue.stop();
        queue.stop();

        let target = MockTarget::new("t1");
        queue.enqueue(post("p1"), Arc::new(target.clone()));

        assert_eq!(queue.pending(), 0);
        assert!(!queue.is_started());
        assert_eq!(target.attempt_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_concurrency_is_unbounded() {
        let queue = queue(10);
        let target = MockTarget::new("slow").with_delay(Duration::from_secs(10));
        let start = tokio::time::Instant::now();

        for i in 0..5 {
            queue.enqueue(post(&format!("p{i}")), Arc::new(target.clone()));
        }
        assert!(queue.drain(Duration::from_secs(60)).await);

        let times = target.attempt_times();
        assert_eq!(times.len(), 5);
        assert!(times.iter().all(|t| *t == times[0]));
        assert!(start.elapsed() < Duration::from_secs(20));
    }

    // ========================================================================
    // Retry
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_retry_storm_backs_off_linearly() {
        let queue = queue(10);
        let target = MockTarget::new("t1").failing_times(3);

        queue.enqueue(post("p1"), Arc::new(target.clone()));
        assert!(queue.drain(Duration::from_secs(600)).await);

        assert_eq!(target.attempt_count(), 4);
        assert_eq!(gaps(&target), vec![MULTIPLIER, MULTIPLIER * 2, MULTIPLIER * 3]);
        assert_eq!(
            queue.stats(),
            QueueStats {
                delivered: 1,
                rejected: 0,
                retried: 3,
                aborted: 0,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_bounded_by_max_retries() {
        let queue = queue(2);
        let target = MockTarget::new("t1").failing_times(100);

        queue.enqueue(post("p1"), Arc::new(target.clone()));
        assert!(queue.drain(Duration::from_secs(600)).await);

        // First try plus two retries, then the item is dropped
        assert_eq!(target.attempt_count(), 3);
        assert_eq!(gaps(&target), vec![MULTIPLIER, MULTIPLIER * 2]);
        assert_eq!(queue.stats().aborted, 1);
        assert_eq!(queue.stats().retried, 2);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(target.attempt_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_retries_never_requeues() {
        let queue = queue(0);
        let target = MockTarget::new("t1").failing_times(1);

        queue.enqueue(post("p1"), Arc::new(target.clone()));
        assert!(queue.drain(Duration::from_secs(60)).await);

        assert_eq!(target.attempt_count(), 1);
        assert_eq!(queue.stats().aborted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_short_circuits_retry() {
        let queue = queue(10);
        let target = MockTarget::new("t1")
            .failing_times(2)
            .failing_permanently_once();

        queue.enqueue(post("p1"), Arc::new(target.clone()));
        assert!(queue.drain(Duration::from_secs(600)).await);

        assert_eq!(target.attempt_count(), 3);
        assert_eq!(queue.stats().rejected, 1);
        assert_eq!(queue.stats().retried, 2);
        assert_eq!(queue.stats().delivered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_does_not_affect_other_targets() {
        let storage: Arc<dyn ErasedStorage> = Arc::new(MemoryStorage::new());
        let queue = queue_with(Arc::clone(&storage), 10);
        let invalid = MockTarget::new("a").invalid();
        let healthy = MockTarget::new("b");

        let original = post("p1");
        queue.enqueue(original.fork(), Arc::new(invalid.clone()));
        queue.enqueue(original.fork(), Arc::new(healthy.clone()));
        assert!(queue.drain(Duration::from_secs(60)).await);

        assert_eq!(invalid.attempt_count(), 1);
        assert_eq!(healthy.attempt_count(), 1);
        assert!(storage.get_post("b", "p1").await.unwrap().is_some());
        assert!(storage.get_post("a", "p1").await.unwrap().is_none());
    }

    // ========================================================================
    // Stop
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_retries() {
        let queue = queue(10);
        let target = MockTarget::new("t1").failing_times(5);

        queue.enqueue(post("p1"), Arc::new(target.clone()));
        while target.attempt_count() == 0 {
            tokio::task::yield_now().await;
        }

        queue.stop();
        let closed = tokio::time::timeout(Duration::from_secs(1), queue.closed()).await;
        assert!(closed.is_ok(), "stop must cancel the retry delay");

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(target.attempt_count(), 1);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_and_stop_finishes_in_flight_work() {
        let queue = queue(10);
        let target = MockTarget::new("t1").with_delay(Duration::from_secs(2));

        queue.enqueue(post("p1"), Arc::new(target.clone()));
        queue.enqueue(post("p2"), Arc::new(target.clone()));

        assert!(queue.drain_and_stop(Duration::from_secs(30)).await);
        assert!(queue.is_stopped());
        assert_eq!(queue.stats().delivered, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_times_out_on_slow_retry() {
        let queue = queue(10);
        let target = MockTarget::new("t1").failing_times(1);

        queue.enqueue(post("p1"), Arc::new(target.clone()));
        assert!(!queue.drain_and_stop(Duration::from_secs(1)).await);
        assert_eq!(target.attempt_count(), 1);
    }
}
