//! Set of running bridges and the task that supervises each one

use crate::bridge::Bridge;
use livebridge_core::Fingerprint;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Running bridges by fingerprint. Clones share the set.
#[derive(Debug, Clone, Default)]
pub struct RunningBridges {
    inner: Arc<Mutex<HashMap<Fingerprint, Arc<Bridge>>>>,
}

impl RunningBridges {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Fingerprint, Arc<Bridge>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.lock().contains_key(fingerprint)
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<Bridge>> {
        self.lock().get(fingerprint).cloned()
    }

    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.lock().keys().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<Arc<Bridge>> {
        self.lock().values().cloned().collect()
    }

    pub(crate) fn insert(&self, bridge: Arc<Bridge>) {
        self.lock().insert(bridge.fingerprint().clone(), bridge);
    }

    pub(crate) fn remove(&self, fingerprint: &Fingerprint) -> Option<Arc<Bridge>> {
        self.lock().remove(fingerprint)
    }

    /// Remove `bridge` unless its slot was already taken by another instance
    fn remove_if_same(&self, bridge: &Arc<Bridge>) {
        let mut running = self.lock();
        let same = running
            .get(bridge.fingerprint())
            .is_some_and(|current| Arc::ptr_eq(current, bridge));
        if same {
            running.remove(bridge.fingerprint());
        }
    }
}

/// Register `bridge` and run it on `tracker` until it stops; the bridge
/// leaves the running set once its teardown finished.
pub fn spawn_bridge(tracker: &TaskTracker, running: &RunningBridges, bridge: Arc<Bridge>) {
    info!(
        "Starting bridge {} ({}, {} target(s), {})",
        bridge.name(),
        bridge.fingerprint().short(),
        bridge.targets().len(),
        bridge.mode()
    );
    running.insert(Arc::clone(&bridge));

    let running = running.clone();
    tracker.spawn(async move {
        Arc::clone(&bridge).run().await;
        running.remove_if_same(&bridge);
        debug!("Bridge {} left the running set", bridge.name());
    });
}
