//! Run progress tracking
//!
//! Throughput and ETA are derived metrics for events and the run summary.
//! The authoritative record of completion is the processed-id set persisted
//! by the checkpoint store.

use crate::types::Progress;
use std::time::{Duration, Instant};

/// Minimum elapsed time before rates are reported
///
/// Below this the sample is too small and the first few completions would
/// produce wild throughput estimates.
const MIN_ELAPSED_FOR_RATE: Duration = Duration::from_secs(2);

/// Tracks completions and derives throughput over one run
#[derive(Debug)]
pub struct ProgressTracker {
    started: Instant,
    processed: u64,
    remaining: u64,
}

impl ProgressTracker {
    /// Create a tracker for `remaining` outstanding tasks
    pub fn new(remaining: u64) -> Self {
        Self {
            started: Instant::now(),
            processed: 0,
            remaining,
        }
    }

    /// Record one completed task
    pub fn record_completed(&mut self) {
        self.processed += 1;
        self.remaining = self.remaining.saturating_sub(1);
    }

    /// Records produced so far in this run
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Tasks still outstanding
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Wall-clock time since the tracker was created
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Current throughput snapshot
    ///
    /// `items_per_min` and `eta` stay `None` until at least one task has
    /// completed and [`MIN_ELAPSED_FOR_RATE`] has elapsed.
    pub fn snapshot(&self) -> Progress {
        let elapsed = self.started.elapsed();

        let (items_per_min, eta) = if elapsed > MIN_ELAPSED_FOR_RATE && self.processed > 0 {
            let per_min = self.processed as f64 / (elapsed.as_secs_f64() / 60.0);
            let eta = (per_min > 0.0)
                .then(|| Duration::from_secs_f64(self.remaining as f64 / per_min * 60.0));
            (Some(per_min), eta)
        } else {
            (None, None)
        };

        Progress {
            processed: self.processed,
            remaining: self.remaining,
            items_per_min,
            eta,
        }
    }
}
