//! Global atomic counters for rollback runs.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    logins: AtomicU64,
    login_failures: AtomicU64,
    rollbacks_succeeded: AtomicU64,
    rollbacks_failed: AtomicU64,
    retries: AtomicU64,
    targets_skipped: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            logins: AtomicU64::new(0),
            login_failures: AtomicU64::new(0),
            rollbacks_succeeded: AtomicU64::new(0),
            rollbacks_failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            targets_skipped: AtomicU64::new(0),
        }
    }

    pub fn inc_logins(&self) {
        self.logins.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "logins", "counter incremented");
    }

    pub fn inc_login_failures(&self) {
        self.login_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "login_failures", "counter incremented");
    }

    pub fn inc_rollbacks_succeeded(&self) {
        self.rollbacks_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rollbacks_succeeded", "counter incremented");
    }

    pub fn inc_rollbacks_failed(&self) {
        self.rollbacks_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rollbacks_failed", "counter incremented");
    }

    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "retries", "counter incremented");
    }

    /// Add `n` skipped targets at once; cancellation skips in bulk.
    pub fn add_targets_skipped(&self, n: u64) {
        self.targets_skipped.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "targets_skipped", n, "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            logins = self.logins(),
            login_failures = self.login_failures(),
            rollbacks_succeeded = self.rollbacks_succeeded(),
            rollbacks_failed = self.rollbacks_failed(),
            retries = self.retries(),
            targets_skipped = self.targets_skipped(),
        );
    }

    pub fn logins(&self) -> u64 {
        self.logins.load(Ordering::Relaxed)
    }

    pub fn login_failures(&self) -> u64 {
        self.login_failures.load(Ordering::Relaxed)
    }

    pub fn rollbacks_succeeded(&self) -> u64 {
        self.rollbacks_succeeded.load(Ordering::Relaxed)
    }

    pub fn rollbacks_failed(&self) -> u64 {
        self.rollbacks_failed.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn targets_skipped(&self) -> u64 {
        self.targets_skipped.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.logins.store(0, Ordering::Relaxed);
        self.login_failures.store(0, Ordering::Relaxed);
        self.rollbacks_succeeded.store(0, Ordering::Relaxed);
        self.rollbacks_failed.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.targets_skipped.store(0, Ordering::Relaxed);
    }
}
