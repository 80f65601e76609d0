//! Pool statistics
//!
//! Counters shared by a session pool and the guards it hands out.

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Statistics for a session pool
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Total sessions created
    pub total_created: AtomicUsize,
    /// Total sessions disconnected and dropped
    pub total_destroyed: AtomicUsize,
    /// Sessions currently idle in the pool
    pub idle_count: AtomicUsize,
    /// Sessions currently borrowed
    pub in_use_count: AtomicUsize,
    /// Total borrows
    pub total_acquired: AtomicUsize,
    /// Total returns into the idle queue
    pub total_returned: AtomicUsize,
    /// Idle sessions discarded because they went stale or failed validation
    pub total_expired: AtomicUsize,
}

impl PoolStats {
    /// Create new pool stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session creation
    pub fn record_created(&self) {
        self.total_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session destruction
    pub fn record_destroyed(&self) {
        self.total_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a borrow
    pub fn record_acquired(&self) {
        self.total_acquired.fetch_add(1, Ordering::Relaxed);
        self.in_use_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the end of a borrow
    pub fn record_released(&self) {
        self.in_use_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a return into the idle queue
    pub fn record_returned(&self) {
        self.total_returned.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an idle session being discarded
    pub fn record_expired(&self) {
        self.total_expired.fetch_add(1, Ordering::Relaxed);
    }

    /// Update idle count
    pub fn set_idle_count(&self, count: usize) {
        self.idle_count.store(count, Ordering::Relaxed);
    }

    /// Get current stats snapshot
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            total_created: self.total_created.load(Ordering::Relaxed),
            total_destroyed: self.total_destroyed.load(Ordering::Relaxed),
            idle_count: self.idle_count.load(Ordering::Relaxed),
            in_use_count: self.in_use_count.load(Ordering::Relaxed),
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_returned: self.total_returned.load(Ordering::Relaxed),
            total_expired: self.total_expired.load(Ordering::Relaxed),
        }
    }

    /// Log pool health status
    pub fn log_health(&self, endpoint: &str) {
        let stats = self.snapshot();
        debug!(
            "Pool health for {}: created={}, destroyed={}, idle={}, in_use={}, acquired={}, returned={}, expired={}",
            endpoint,
            stats.total_created,
            stats.total_destroyed,
            stats.idle_count,
            stats.in_use_count,
            stats.total_acquired,
            stats.total_returned,
            stats.total_expired
        );
    }
}

/// Snapshot of pool statistics
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    pub total_created: usize,
    pub total_destroyed: usize,
    pub idle_count: usize,
    pub in_use_count: usize,
    pub total_acquired: usize,
    pub total_returned: usize,
    pub total_expired: usize,
}

impl PoolStatsSnapshot {
    /// Sessions created and not yet destroyed
    pub fn live(&self) -> usize {
        self.total_created.saturating_sub(self.total_destroyed)
    }
}
