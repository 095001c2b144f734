//! Age-based retention for per-message relay state.
//!
//! Maps keyed by message id are swept every [`SWEEP_EVERY`] writes; entries
//! not touched within the retention window are dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Writes between two sweeps of a retained map.
pub const SWEEP_EVERY: u64 = 256;

#[derive(Debug)]
pub struct Retention {
    keep_for: Duration,
    writes: AtomicU64,
}

impl Retention {
    pub fn new(keep_for: Duration) -> Self {
        Self {
            keep_for,
            writes: AtomicU64::new(0),
        }
    }

    /// Count a write. Returns true when a sweep is due.
    pub fn record_write(&self) -> bool {
        (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0
    }

    pub fn is_fresh(&self, touched: Instant) -> bool {
        touched.elapsed() < self.keep_for
    }
}
