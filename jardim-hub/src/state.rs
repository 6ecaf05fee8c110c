use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use jardim_core::PotId;

/// Shared state of a running hub.
pub struct HubState {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    active_pot: Option<PotId>,
    applied: u64,
    rejected: u64,
    startup_time: Instant,
}

/// Message counters since startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageStats {
    pub applied: u64,
    pub rejected: u64,
}

impl HubState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                active_pot: None,
                applied: 0,
                rejected: 0,
                startup_time: Instant::now(),
            })),
        }
    }

    /// The pot inbound telemetry is applied to.
    pub async fn active_pot(&self) -> Option<PotId> {
        self.inner.lock().await.active_pot
    }

    pub async fn set_active_pot(&self, pot: Option<PotId>) {
        self.inner.lock().await.active_pot = pot;
    }

    /// Make `pot` active unless another pot already is. Returns whether it changed.
    pub async fn activate_if_idle(&self, pot: PotId) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.active_pot.is_some() {
            return false;
        }
        inner.active_pot = Some(pot);
        true
    }

    /// Clear the active pot if it is `pot`.
    pub async fn deactivate(&self, pot: PotId) {
        let mut inner = self.inner.lock().await;
        if inner.active_pot == Some(pot) {
            inner.active_pot = None;
        }
    }

    pub async fn record_applied(&self) {
        self.inner.lock().await.applied += 1;
    }

    pub async fn record_rejected(&self) {
        self.inner.lock().await.rejected += 1;
    }

    pub async fn stats(&self) -> MessageStats {
        let inner = self.inner.lock().await;
        MessageStats {
            applied: inner.applied,
            rejected: inner.rejected,
        }
    }

    pub async fn uptime_secs(&self) -> u64 {
        let inner = self.inner.lock().await;
        inner.startup_time.elapsed().as_secs()
    }
}

impl Default for HubState {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for HubState {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
