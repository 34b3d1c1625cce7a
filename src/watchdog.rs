//! Liveness tracking for the sensor backend.
//!
//! Every hardware read attempt, successful or not, counts as proof that the
//! backend is still being exercised. The monitor never influences control
//! decisions; it only answers "has anything touched the bus recently?".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Snapshot of the watchdog as exposed to the API layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchdogStatus {
    pub healthy: bool,
    pub last_access_age_seconds: f64,
    pub last_access_at: DateTime<Utc>,
    pub healthy_threshold_seconds: u64,
}

#[derive(Debug, Clone, Copy)]
struct LastAccess {
    at: Instant,
    wall: DateTime<Utc>,
}

impl LastAccess {
    fn now() -> Self {
        Self {
            at: Instant::now(),
            wall: Utc::now(),
        }
    }
}

/// Records the most recent sensor access.
#[derive(Debug)]
pub struct WatchdogMonitor {
    last_access: Mutex<LastAccess>,
    threshold: Duration,
}

impl WatchdogMonitor {
    /// Create a monitor; construction counts as the first access.
    pub fn new(threshold: Duration) -> Self {
        Self {
            last_access: Mutex::new(LastAccess::now()),
            threshold,
        }
    }

    fn last(&self) -> LastAccess {
        *self.last_access.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_access(&self) {
        *self.last_access.lock().unwrap_or_else(|e| e.into_inner()) = LastAccess::now();
    }

    /// Time since the last recorded access.
    pub fn last_access_age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last().at)
    }

    pub fn is_healthy(&self) -> bool {
        self.last_access_age() < self.threshold
    }

    pub fn status(&self) -> WatchdogStatus {
        let last = self.last();
        let age = Instant::now().saturating_duration_since(last.at);
        WatchdogStatus {
            healthy: age < self.threshold,
            last_access_age_seconds: age.as_secs_f64(),
            last_access_at: last.wall,
            healthy_threshold_seconds: self.threshold.as_secs(),
        }
    }
}
