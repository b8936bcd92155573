//! Monitoring metrics.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use serde::Serialize;


//------------ FixerMetrics --------------------------------------------------

/// The counters maintained by a fixer.
///
/// All counters are updated atomically. They are for operational
/// visibility only; the fixer never makes decisions based on them.
#[derive(Debug, Default)]
pub struct FixerMetrics {
    /// Issuer URLs that were fetched and decoded successfully.
    reconstructed: AtomicU64,

    /// Issuer URLs that could not be fetched or decoded.
    not_reconstructed: AtomicU64,

    /// Chains that verified, with or without fetching.
    fixed: AtomicU64,

    /// Chains that could not be made to verify.
    not_fixed: AtomicU64,

    /// Chains dropped because they had been submitted before.
    skipped: AtomicU64,

    /// Issuer fetches answered by the cache without network access.
    already_done: AtomicU64,

    /// The number of workers currently processing a chain.
    active: AtomicUsize,
}

impl FixerMetrics {
    pub fn inc_reconstructed(&self) {
        self.reconstructed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_not_reconstructed(&self) {
        self.not_reconstructed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fixed(&self) {
        self.fixed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_not_fixed(&self) {
        self.not_fixed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_already_done(&self) {
        self.already_done.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks a worker as active until the returned guard is dropped.
    pub fn activate(&self) -> ActiveGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        ActiveGuard(&self.active)
    }

    /// Returns the current values of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active: self.active.load(Ordering::Relaxed),
            reconstructed: self.reconstructed.load(Ordering::Relaxed),
            not_reconstructed: self.not_reconstructed.load(Ordering::Relaxed),
            fixed: self.fixed.load(Ordering::Relaxed),
            not_fixed: self.not_fixed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            already_done: self.already_done.load(Ordering::Relaxed),
        }
    }
}


//------------ ActiveGuard ---------------------------------------------------

/// Decrements the active worker count when dropped.
#[derive(Debug)]
pub struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> Drop for ActiveGuard<'a> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}


//------------ MetricsSnapshot -----------------------------------------------

/// The values of the fixer counters at some point in time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub active: usize,
    pub reconstructed: u64,
    pub not_reconstructed: u64,
    pub fixed: u64,
    pub not_fixed: u64,
    pub skipped: u64,
    pub already_done: u64,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f,
            "fixers: {} active, \
             {} reconstructed, {} not reconstructed, \
             {} fixed, {} not fixed, {} skipped, {} already done",
            self.active, self.reconstructed, self.not_reconstructed,
            self.fixed, self.not_fixed, self.skipped, self.already_done
        )
    }
}


//============ Tests =========================================================
