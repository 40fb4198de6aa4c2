//! Runtime counters for one bus instance.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe dispatch counters.
#[derive(Debug, Default)]
pub struct BusMetrics {
    /// Envelopes entering dispatch
    pub fired: AtomicU64,
    /// Successful receiver invocations
    pub delivered: AtomicU64,
    /// Failed receiver invocations
    pub receiver_failures: AtomicU64,
    /// Envelopes resubmitted by the redelivery scheduler
    pub redelivered: AtomicU64,
    /// Envelopes that ran out of attempts
    pub exhausted: AtomicU64,
    /// Dispatches that found no exact subscription
    pub no_subscription: AtomicU64,
    /// Duplicate STORE envelopes skipped
    pub duplicates_skipped: AtomicU64,
}

impl BusMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fired(&self) {
        self.fired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receiver_failure(&self) {
        self.receiver_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_redelivered(&self) {
        self.redelivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_subscription(&self) {
        self.no_subscription.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_skipped(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fired: self.fired.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            receiver_failures: self.receiver_failures.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            no_subscription: self.no_subscription.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.fired.store(0, Ordering::Relaxed);
        self.delivered.store(0, Ordering::Relaxed);
        self.receiver_failures.store(0, Ordering::Relaxed);
        self.redelivered.store(0, Ordering::Relaxed);
        self.exhausted.store(0, Ordering::Relaxed);
        self.no_subscription.store(0, Ordering::Relaxed);
        self.duplicates_skipped.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time metrics snapshot
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub fired: u64,
    pub delivered: u64,
    pub receiver_failures: u64,
    pub redelivered: u64,
    pub exhausted: u64,
    pub no_subscription: u64,
    pub duplicates_skipped: u64,
}
