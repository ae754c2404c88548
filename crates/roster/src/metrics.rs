//! Saga and reconciliation metrics.
//!
//! [`RosterMetrics`] is a set of independent monotonically increasing
//! counters. All atomic operations use `Ordering::Relaxed`: each counter is
//! atomic on its own, and [`snapshot`](RosterMetrics::snapshot) may observe
//! counters slightly out of step with each other, which is acceptable for
//! telemetry.
//!
//! # Usage
//!
//! ```
//! use std::time::Duration;
//!
//! use faculty_roster::RosterMetrics;
//!
//! let metrics = RosterMetrics::new();
//! metrics.record_create(Duration::from_micros(250));
//! metrics.record_compensation();
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.creates, 1);
//! assert_eq!(snapshot.compensations, 1);
//! assert_eq!(snapshot.avg_create_latency_us(), 250.0);
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

#[derive(Debug, Default)]
struct Counters {
    creates: AtomicU64,
    create_failures: AtomicU64,
    create_latency_us: AtomicU64,
    deletes: AtomicU64,
    delete_failures: AtomicU64,
    delete_latency_us: AtomicU64,
    profile_updates: AtomicU64,
    compensations: AtomicU64,
    orphans_recorded: AtomicU64,
    orphans_reclaimed: AtomicU64,
    retries: AtomicU64,
    retries_exhausted: AtomicU64,
}

/// Shared counters for the lifecycle coordinator and reconciler.
///
/// Cheaply cloneable; all clones update the same counters.
#[derive(Debug, Clone, Default)]
pub struct RosterMetrics {
    inner: Arc<Counters>,
}

/// Point-in-time copy of [`RosterMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RosterMetricsSnapshot {
    /// Successful creates.
    pub creates: u64,
    /// Creates that returned an error.
    pub create_failures: u64,
    /// Cumulative latency of successful creates, in microseconds.
    pub create_latency_us: u64,
    /// Successful deletes.
    pub deletes: u64,
    /// Deletes that returned an error.
    pub delete_failures: u64,
    /// Cumulative latency of successful deletes, in microseconds.
    pub delete_latency_us: u64,
    /// Successful profile updates.
    pub profile_updates: u64,
    /// Blob compensations performed after a failed create.
    pub compensations: u64,
    /// Orphaned blobs queued for reconciliation.
    pub orphans_recorded: u64,
    /// Orphaned blobs removed by the reconciler.
    pub orphans_reclaimed: u64,
    /// Retries of transient object store failures.
    pub retries: u64,
    /// Retry loops that gave up on a transient failure.
    pub retries_exhausted: u64,
}

impl RosterMetricsSnapshot {
    /// Average latency of successful creates, in microseconds.
    #[must_use]
    pub fn avg_create_latency_us(&self) -> f64 {
        average(self.create_latency_us, self.creates)
    }

    /// Average latency of successful deletes, in microseconds.
    #[must_use]
    pub fn avg_delete_latency_us(&self) -> f64 {
        average(self.delete_latency_us, self.deletes)
    }
}

fn average(total: u64, count: u64) -> f64 {
    if count == 0 { 0.0 } else { total as f64 / count as f64 }
}

fn micros(latency: Duration) -> u64 {
    u64::try_from(latency.as_micros()).unwrap_or(u64::MAX)
}

impl RosterMetrics {
    /// Creates a zeroed set of counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful create.
    pub fn record_create(&self, latency: Duration) {
        self.inner.creates.fetch_add(1, Ordering::Relaxed);
        self.inner.create_latency_us.fetch_add(micros(latency), Ordering::Relaxed);
    }

    /// Records a failed create.
    pub fn record_create_failure(&self) {
        self.inner.create_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful delete.
    pub fn record_delete(&self, latency: Duration) {
        self.inner.deletes.fetch_add(1, Ordering::Relaxed);
        self.inner.delete_latency_us.fetch_add(micros(latency), Ordering::Relaxed);
    }

    /// Records a failed delete.
    pub fn record_delete_failure(&self) {
        self.inner.delete_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful profile update.
    pub fn record_profile_update(&self) {
        self.inner.profile_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a blob compensation.
    pub fn record_compensation(&self) {
        self.inner.compensations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a blob queued for reconciliation.
    pub fn record_orphan(&self) {
        self.inner.orphans_recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a blob removed by the reconciler.
    pub fn record_reclaimed(&self) {
        self.inner.orphans_reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one retry of a transient failure.
    pub fn record_retry(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a retry loop giving up.
    pub fn record_retry_exhausted(&self) {
        self.inner.retries_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current value of every counter.
    #[must_use]
    pub fn snapshot(&self) -> RosterMetricsSnapshot {
        let c = &self.inner;
        RosterMetricsSnapshot {
            creates: c.creates.load(Ordering::Relaxed),
            create_failures: c.create_failures.load(Ordering::Relaxed),
            create_latency_us: c.create_latency_us.load(Ordering::Relaxed),
            deletes: c.deletes.load(Ordering::Relaxed),
            delete_failures: c.delete_failures.load(Ordering::Relaxed),
            delete_latency_us: c.delete_latency_us.load(Ordering::Relaxed),
            profile_updates: c.profile_updates.load(Ordering::Relaxed),
            compensations: c.compensations.load(Ordering::Relaxed),
            orphans_recorded: c.orphans_recorded.load(Ordering::Relaxed),
            orphans_reclaimed: c.orphans_reclaimed.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            retries_exhausted: c.retries_exhausted.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter. Increments racing with the reset may be lost.
    pub fn reset(&self) {
        let c = &self.inner;
        for counter in [
            &c.creates,
            &c.create_failures,
            &c.create_latency_us,
            &c.deletes,
            &c.delete_failures,
            &c.delete_latency_us,
            &c.profile_updates,
            &c.compensations,
            &c.orphans_recorded,
            &c.orphans_reclaimed,
            &c.retries,
            &c.retries_exhausted,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
