use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Minimal counters for operational visibility. Daily counters are reset by
/// the periodic report; `cycles` and `skipped_overlaps` are process totals.
#[derive(Clone, Default)]
pub struct Counters {
    pub checks_today: Arc<AtomicU64>,
    pub alerts_today: Arc<AtomicU64>,
    pub errors_today: Arc<AtomicU64>,

    pub cycles: Arc<AtomicU64>,
    pub skipped_overlaps: Arc<AtomicU64>,

    pub last_run: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_last_run(&self, at: DateTime<Utc>) {
        *self.last_run.lock() = Some(at);
    }

    pub fn snapshot(&self, is_running: bool) -> MonitoringStats {
        MonitoringStats {
            checks_today: self.checks_today.load(Ordering::Relaxed),
            alerts_today: self.alerts_today.load(Ordering::Relaxed),
            errors_today: self.errors_today.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            skipped_overlaps: self.skipped_overlaps.load(Ordering::Relaxed),
            last_run: *self.last_run.lock(),
            is_running,
        }
    }

    pub fn reset_daily(&self) {
        self.checks_today.store(0, Ordering::Relaxed);
        self.alerts_today.store(0, Ordering::Relaxed);
        self.errors_today.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time view of the orchestrator's counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MonitoringStats {
    pub checks_today: u64,
    pub alerts_today: u64,
    pub errors_today: u64,
    pub cycles: u64,
    pub skipped_overlaps: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub is_running: bool,
}

/// Periodic operational summary handed to the notifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MonitoringReport {
    pub active_watches: u64,
    /// Offers stored since the previous report.
    pub offers_found: u64,
    pub checks: u64,
    pub alerts: u64,
    pub errors: u64,
    pub generated_at: DateTime<Utc>,
}
