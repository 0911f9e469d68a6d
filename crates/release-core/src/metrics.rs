//! Global atomic counters for the release engine.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. after an `evaluate_all` pass).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    evaluations: AtomicU64,
    releases_created: AtomicU64,
    jobs_created: AtomicU64,
    requeues: AtomicU64,
    lease_contention: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            evaluations: AtomicU64::new(0),
            releases_created: AtomicU64::new(0),
            jobs_created: AtomicU64::new(0),
            requeues: AtomicU64::new(0),
            lease_contention: AtomicU64::new(0),
        }
    }

    pub fn inc_evaluations(&self) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "evaluations", "counter incremented");
    }

    pub fn inc_releases_created(&self) {
        self.releases_created.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "releases_created", "counter incremented");
    }

    pub fn inc_jobs_created(&self) {
        self.jobs_created.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "jobs_created", "counter incremented");
    }

    pub fn inc_requeues(&self) {
        self.requeues.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "requeues", "counter incremented");
    }

    pub fn inc_lease_contention(&self) {
        self.lease_contention.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "lease_contention", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            evaluations = self.evaluations(),
            releases_created = self.releases_created(),
            jobs_created = self.jobs_created(),
            requeues = self.requeues(),
            lease_contention = self.lease_contention(),
        );
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn releases_created(&self) -> u64 {
        self.releases_created.load(Ordering::Relaxed)
    }

    pub fn jobs_created(&self) -> u64 {
        self.jobs_created.load(Ordering::Relaxed)
    }

    pub fn requeues(&self) -> u64 {
        self.requeues.load(Ordering::Relaxed)
    }

    pub fn lease_contention(&self) -> u64 {
        self.lease_contention.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.evaluations.store(0, Ordering::Relaxed);
        self.releases_created.store(0, Ordering::Relaxed);
        self.jobs_created.store(0, Ordering::Relaxed);
        self.requeues.store(0, Ordering::Relaxed);
        self.lease_contention.store(0, Ordering::Relaxed);
    }
}
