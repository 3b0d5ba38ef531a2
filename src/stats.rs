//! Delivery statistics for a notifier.
//!
//! Counts what happened to each record without keeping the records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters shared between a notifier and its dispatcher task.
#[derive(Debug)]
pub struct DeliveryStats {
    /// Movement records scheduled for delayed dispatch
    scheduled: AtomicU64,
    /// Records handed to an open connection
    sent: AtomicU64,
    /// Records dropped because the connection was not open
    dropped: AtomicU64,
    /// Records withheld by audit mode
    suppressed: AtomicU64,
    /// Scheduled records cancelled before they fired
    cancelled: AtomicU64,
    started_at: DateTime<Utc>,
}

impl DeliveryStats {
    pub fn new() -> Self {
        Self {
            scheduled: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current counters.
    pub fn snapshot(&self) -> DeliverySnapshot {
        DeliverySnapshot {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            started_at: self.started_at,
            elapsed_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Delivery Statistics:\n\
             - Movements scheduled: {}\n\
             - Records sent: {}\n\
             - Records dropped (connection not open): {}\n\
             - Records suppressed (audit mode): {}\n\
             - Movements cancelled: {}\n\
             - Duration: {} seconds",
            stats.scheduled,
            stats.sent,
            stats.dropped,
            stats.suppressed,
            stats.cancelled,
            stats.elapsed_secs
        )
    }
}

impl Default for DeliveryStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`DeliveryStats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySnapshot {
    pub scheduled: u64,
    pub sent: u64,
    pub dropped: u64,
    pub suppressed: u64,
    pub cancelled: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: u64,
}

pub type SharedDeliveryStats = Arc<DeliveryStats>;
