//! Reconciliation controller
//!
//! Keeps the set of running bridges in line with the control document:
//!
//! 1. Load the document (reusing the last good one when loading fails, or
//!    retrying after a delay when there never was one)
//! 2. Stop running bridges whose fingerprint is gone, start missing ones
//! 3. Watch the control location and repeat on change
//! 4. On shutdown stop every bridge and wait, bounded, for them to finish

mod supervisor;

pub use supervisor::{RunningBridges, spawn_bridge};

use crate::bridge::{Bridge, BridgeOptions, RetryPolicy, cancellable_sleep};
use crate::component::ComponentRegistry;
use crate::control::ControlData;
use crate::storage::ErasedStorage;
use livebridge_core::config::Settings;
use livebridge_core::{ControlDocument, Fingerprint};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Interval at which shutdown checks whether the running set is empty
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Outcome of a shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Bridges asked to stop
    pub stopped: usize,
    /// Bridges still running when the timeout elapsed
    pub timed_out: usize,
}

/// Intervals the controller runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerTimings {
    pub watch_interval: Duration,
    pub retry_run_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl From<&Settings> for ControllerTimings {
    fn from(settings: &Settings) -> Self {
        Self {
            watch_interval: settings.control.watch_interval(),
            retry_run_interval: settings.control.retry_run_interval(),
            shutdown_timeout: settings.shutdown_timeout(),
        }
    }
}

/// Cheap handle for observing and stopping a running controller
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    running: RunningBridges,
    cancel: CancellationToken,
}

impl ControllerHandle {
    pub fn running(&self) -> &RunningBridges {
        &self.running
    }

    pub fn bridge(&self, fingerprint: &Fingerprint) -> Option<Arc<Bridge>> {
        self.running.get(fingerprint)
    }

    /// Ask the controller to shut down
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

pub struct Controller {
    control: ControlData,
    registry: Arc<ComponentRegistry>,
    storage: Arc<dyn ErasedStorage>,
    options: BridgeOptions,
    timings: ControllerTimings,
    cancel: CancellationToken,
    running: RunningBridges,
    tracker: TaskTracker,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("control", &self.control)
            .field("running", &self.running.len())
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}

impl Controller {
    pub fn new(
        control: ControlData,
        registry: Arc<ComponentRegistry>,
        storage: Arc<dyn ErasedStorage>,
        settings: &Settings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            control,
            registry,
            storage,
            options: BridgeOptions {
                default_interval: settings.poll_interval(),
                retry: RetryPolicy::from(&settings.retry),
            },
            timings: ControllerTimings::from(settings),
            cancel,
            running: RunningBridges::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn with_timings(mut self, timings: ControllerTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            running: self.running.clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn running(&self) -> &RunningBridges {
        &self.running
    }

    pub fn control(&self) -> &ControlData {
        &self.control
    }

    /// Load the control document.
    ///
    /// Falls back to the last good document when loading fails; `None` only
    /// when no document was ever loaded.
    pub async fn load(&mut self) -> Option<ControlDocument> {
        if let Err(e) = self.control.load().await {
            match self.control.current() {
                Some(_) => warn!("Failed to load control data, keeping previous: {}", e),
                None => error!("Failed to load control data from {}: {}", self.control.path(), e),
            }
        }
        self.control.current().cloned()
    }

    /// Converge the running set on `doc`
    pub fn reconcile(&self, doc: &ControlDocument) {
        self.remove_old_bridges(doc);
        self.add_new_bridges(doc);
        debug!("{} bridge(s) running", self.running.len());
    }

    /// Stop running bridges whose fingerprint is not in `doc`
    pub fn remove_old_bridges(&self, doc: &ControlDocument) -> usize {
        let wanted: HashSet<Fingerprint> = doc.bridges.iter().map(|b| b.fingerprint()).collect();
        let mut removed = 0;
        for fingerprint in self.running.fingerprints() {
            if wanted.contains(&fingerprint) {
                continue;
            }
            if let Some(bridge) = self.running.remove(&fingerprint) {
                info!("Removing bridge {} ({})", bridge.name(), fingerprint);
                bridge.stop();
                removed += 1;
            }
        }
        removed
    }

    /// Start a bridge for every config in `doc` that is not running yet
    pub fn add_new_bridges(&self, doc: &ControlDocument) -> usize {
        let mut added = 0;
        for config in &doc.bridges {
            let fingerprint = config.fingerprint();
            if self.running.contains(&fingerprint) {
                debug!("Bridge {} unchanged", fingerprint);
                continue;
            }
            match Bridge::build(
                config,
                &self.registry,
                Arc::clone(&self.storage),
                &self.options,
                &self.cancel,
            ) {
                Ok(bridge) => {
                    spawn_bridge(&self.tracker, &self.running, bridge);
                    added += 1;
                }
                Err(e) => error!("Failed to start bridge {} ({}): {}", config.label(), fingerprint, e),
            }
        }
        added
    }

    /// Run until cancelled, then shut down
    pub async fn run(&mut self) -> ShutdownReport {
        if self.retry_run().await {
            if self.control.is_auto_update() {
                self.watch().await;
            } else {
                info!("Control data at {} is static", self.control.path());
                self.cancel.cancelled().await;
            }
        }
        self.clean_shutdown().await
    }

    /// Load and reconcile, retrying until a document is available.
    ///
    /// Returns false when cancelled first.
    async fn retry_run(&mut self) -> bool {
        loop {
            if let Some(doc) = self.load().await {
                self.reconcile(&doc);
                return true;
            }
            warn!(
                "No control data available, retrying in {:?}",
                self.timings.retry_run_interval
            );
            if !cancellable_sleep(self.timings.retry_run_interval, &self.cancel).await {
                return false;
            }
        }
    }

    async fn watch(&mut self) {
        info!(
            "Watching control data at {} every {:?}",
            self.control.path(),
            self.timings.watch_interval
        );
        while cancellable_sleep(self.timings.watch_interval, &self.cancel).await {
            match self.control.check_for_change().await {
                Ok(true) => {
                    info!("Control data changed, reloading");
                    if let Some(doc) = self.load().await {
                        self.reconcile(&doc);
                    }
                }
                Ok(false) => {}
                Err(e) => warn!("Checking control data for changes failed: {}", e),
            }
        }
    }

    /// Stop every bridge and wait, bounded by the shutdown timeout, for the
    /// running set to empty and every bridge task to finish. Closes the
    /// control client.
    pub async fn clean_shutdown(&self) -> ShutdownReport {
        self.cancel.cancel();
        let bridges = self.running.snapshot();
        info!(
            "Beginning clean shutdown of {} bridge(s) (timeout: {:?})",
            bridges.len(),
            self.timings.shutdown_timeout
        );
        for bridge in &bridges {
            bridge.stop();
        }
        self.tracker.close();

        let deadline = Instant::now() + self.timings.shutdown_timeout;
        while !self.running.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }

        // Bridges removed by earlier reloads may still be tearing down
        let remaining = deadline.saturating_duration_since(Instant::now());
        if tokio::time::timeout(remaining, self.tracker.wait()).await.is_err() {
            warn!(
                "{} bridge task(s) still tearing down after {:?}",
                self.tracker.len(),
                self.timings.shutdown_timeout
            );
        }

        let report = ShutdownReport {
            stopped: bridges.len(),
            timed_out: self.running.len(),
        };
        if report.timed_out > 0 {
            warn!(
                "{} bridge(s) still running after {:?}",
                report.timed_out, self.timings.shutdown_timeout
            );
        }

        self.control.close().await;
        info!(
            "Clean shutdown complete: {} stopped, {} timed out",
            report.stopped, report.timed_out
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{MockPost, MockSource, MockSourceCall, MockTarget, SourceMode, mock_registry};
    use crate::control::client_for;
    use crate::storage::{MockStorage, MockStorageCall};
    use livebridge_core::{BridgeConfig, TargetConfig};

    fn bridge_config(source_id: &str, target_ids: &[&str]) -> BridgeConfig {
        target_ids.iter().fold(
            BridgeConfig::new("mock").with_source_id(source_id),
            |config, id| config.with_target(TargetConfig::new("mock").with_target_id(*id)),
        )
    }

    fn document(bridges: Vec<BridgeConfig>) -> ControlDocument {
        ControlDocument {
            bridges,
            ..Default::default()
        }
    }

    fn timings() -> ControllerTimings {
        ControllerTimings {
            watch_interval: Duration::from_secs(5),
            retry_run_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    struct Fixture {
        storage: MockStorage,
        sources: Vec<(&'static str, MockSource)>,
        targets: Vec<MockTarget>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                storage: MockStorage::new(),
                sources: vec![
                    ("s1", MockSource::new(SourceMode::Polling)),
                    ("s2", MockSource::new(SourceMode::Polling)),
                ],
                targets: vec![MockTarget::new("t1"), MockTarget::new("t2")],
            }
        }

        fn source(&self, id: &str) -> &MockSource {
            &self.sources.iter().find(|(s, _)| *s == id).unwrap().1
        }

        fn controller(&self, auto_update: bool) -> Controller {
            let storage: Arc<dyn ErasedStorage> = Arc::new(self.storage.clone());
            let control = ControlData::new(
                client_for("storage", Arc::clone(&storage)),
                "storage",
                auto_update,
            );
            let registry = Arc::new(mock_registry(&self.sources, &self.targets));
            Controller::new(
                control,
                registry,
                storage,
                &Settings::default(),
                CancellationToken::new(),
            )
            .with_timings(timings())
        }

        async fn publish(&self, doc: &ControlDocument) {
            crate::storage::Storage::save_control(&self.storage, doc)
                .await
                .unwrap();
        }
    }

    // ========================================================================
    // Reconcile
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_starts_missing_bridges() {
        let fixture = Fixture::new();
        let controller = fixture.controller(true);
        let doc = document(vec![bridge_config("s1", &["t1"]), bridge_config("s2", &["t2"])]);

        controller.reconcile(&doc);
        assert_eq!(controller.running().len(), 2);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fixture.source("s1").count(&MockSourceCall::Poll), 1);
        assert_eq!(fixture.source("s2").count(&MockSourceCall::Poll), 1);

        controller.clean_shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_fingerprint_is_not_restarted() {
        let fixture = Fixture::new();
        let controller = fixture.controller(true);
        let config = bridge_config("s1", &["t1"]);
        let doc = document(vec![config.clone()]);

        controller.reconcile(&doc);
        let before = controller.running().get(&config.fingerprint()).unwrap();

        controller.reconcile(&doc.clone());
        let after = controller.running().get(&config.fingerprint()).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(!before.is_stopped());

        controller.clean_shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_bridge_is_stopped_once() {
        let fixture = Fixture::new();
        let controller = fixture.controller(true);
        let kept = bridge_config("s1", &["t1"]);
        let dropped = bridge_config("s2", &["t2"]);

        controller.reconcile(&document(vec![kept.clone(), dropped.clone()]));
        let handle = controller.running().get(&dropped.fingerprint()).unwrap();

        assert_eq!(controller.remove_old_bridges(&document(vec![kept.clone()])), 1);
        assert!(!controller.running().contains(&dropped.fingerprint()));
        assert!(controller.running().contains(&kept.fingerprint()));
        assert!(handle.is_stopped());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fixture.source("s2").count(&MockSourceCall::Stop), 1);
        assert_eq!(fixture.source("s1").count(&MockSourceCall::Stop), 0);

        controller.clean_shutdown().await;
        assert_eq!(fixture.source("s2").count(&MockSourceCall::Stop), 1);
        assert_eq!(fixture.source("s1").count(&MockSourceCall::Stop), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_changed_targets_restart_bridge() {
        let fixture = Fixture::new();
        let controller = fixture.controller(true);
        let old = bridge_config("s1", &["t1"]);
        let new = bridge_config("s1", &["t1", "t2"]);

        controller.reconcile(&document(vec![old.clone()]));
        controller.reconcile(&document(vec![new.clone()]));

        assert_eq!(controller.running().fingerprints(), vec![new.fingerprint()]);
        controller.clean_shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_build_does_not_block_other_bridges() {
        let fixture = Fixture::new();
        let controller = fixture.controller(true);
        let broken = bridge_config("s1", &["no-such-target"]);
        let healthy = bridge_config("s2", &["t2"]);

        controller.reconcile(&document(vec![broken.clone(), healthy.clone()]));
        assert_eq!(controller.running().fingerprints(), vec![healthy.fingerprint()]);

        controller.clean_shutdown().await;
    }

    // ========================================================================
    // Load, watch and retry
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_until_control_data_appears() {
        let fixture = Fixture::new();
        let mut controller = fixture.controller(true);
        let handle = controller.handle();
        let run = tokio::spawn(async move { controller.run().await });

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(
            fixture.storage.count(|c| matches!(c, MockStorageCall::GetControl)),
            2
        );
        assert!(handle.running().is_empty());

        fixture.publish(&document(vec![bridge_config("s1", &["t1"])])).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(handle.running().len(), 1);

        handle.shutdown();
        let report = run.await.unwrap();
        assert_eq!(report, ShutdownReport { stopped: 1, timed_out: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_reloads_on_change() {
        let fixture = Fixture::new();
        let first = bridge_config("s1", &["t1"]);
        let second = bridge_config("s2", &["t2"]);
        fixture.publish(&document(vec![first.clone()])).await;

        let mut controller = fixture.controller(true);
        let handle = controller.handle();
        let run = tokio::spawn(async move { controller.run().await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.running().fingerprints(), vec![first.fingerprint()]);

        fixture.publish(&document(vec![second.clone()])).await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(handle.running().fingerprints(), vec![second.fingerprint()]);
        assert_eq!(fixture.source("s1").count(&MockSourceCall::Stop), 1);

        handle.shutdown();
        run.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_control_is_not_watched() {
        let fixture = Fixture::new();
        fixture.publish(&document(vec![bridge_config("s1", &["t1"])])).await;

        let mut controller = fixture.controller(false);
        let handle = controller.handle();
        let run = tokio::spawn(async move { controller.run().await });

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(
            fixture.storage.count(|c| matches!(c, MockStorageCall::GetControl)),
            1
        );

        handle.shutdown();
        run.await.unwrap();
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_delivery() {
        let mut fixture = Fixture::new();
        fixture.targets = vec![MockTarget::new("t1").with_delay(Duration::from_secs(3))];
        fixture.sources[0].1.push_batch(vec![MockPost::new("p1").item()]);
        fixture.publish(&document(vec![bridge_config("s1", &["t1"])])).await;

        let mut controller = fixture.controller(true);
        let handle = controller.handle();
        let run = tokio::spawn(async move { controller.run().await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.shutdown();
        let report = run.await.unwrap();

        assert_eq!(report.timed_out, 0);
        assert_eq!(fixture.storage.post_count(), 1);
        assert!(handle.running().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_bridges_removed_earlier() {
        let mut fixture = Fixture::new();
        fixture.targets = vec![
            MockTarget::new("t1").with_delay(Duration::from_secs(3)),
            MockTarget::new("t2"),
        ];
        fixture.sources[0].1.push_batch(vec![MockPost::new("p1").item()]);
        let controller = fixture.controller(true);
        let dropped = bridge_config("s1", &["t1"]);
        let kept = bridge_config("s2", &["t2"]);

        controller.reconcile(&document(vec![dropped.clone(), kept.clone()]));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(controller.remove_old_bridges(&document(vec![kept])), 1);

        let report = controller.clean_shutdown().await;
        assert_eq!(report, ShutdownReport { stopped: 1, timed_out: 0 });
        assert_eq!(fixture.storage.post_count(), 1);
        assert_eq!(fixture.source("s1").count(&MockSourceCall::Stop), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_bounded_by_timeout() {
        let mut fixture = Fixture::new();
        fixture.targets = vec![MockTarget::new("t1").with_delay(Duration::from_secs(3600))];
        fixture.sources[0].1.push_batch(vec![MockPost::new("p1").item()]);
        fixture.publish(&document(vec![bridge_config("s1", &["t1"])])).await;

        let mut controller = fixture.controller(true);
        let handle = controller.handle();
        let run = tokio::spawn(async move { controller.run().await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        let start = Instant::now();
        handle.shutdown();
        let report = run.await.unwrap();

        assert_eq!(report, ShutdownReport { stopped: 1, timed_out: 1 });
        assert!(start.elapsed() < Duration::from_secs(15));
    }
}
