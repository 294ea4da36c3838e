//! Acquisition statistics.
//!
//! Counters are plain atomics updated from the ingest path; consumers read
//! a point-in-time [`MetricsSnapshot`]. The [`RateTracker`] derives
//! arrays/sec and bytes/sec from snapshots taken on a fixed cadence
//! (one second by convention), averaging the last ten intervals.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Number of per-interval samples kept for the rolling array rate.
const RATE_WINDOW: usize = 10;

/// Shared acquisition counters.
#[derive(Debug, Default)]
pub struct ScopeMetrics {
    /// Total batches received from the transport, including frozen ones.
    pub arrays_received: AtomicU64,

    /// Total arrays lost, summed over every tracked id source.
    pub arrays_lost: AtomicU64,

    /// Estimated byte size of one delivered object; zero until the first
    /// batch has been sized.
    pub object_size: AtomicU64,
}

impl ScopeMetrics {
    /// Creates zeroed metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one received batch.
    pub fn record_received(&self) {
        self.arrays_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds lost arrays detected by a sequence tracker.
    pub fn record_lost(&self, count: u64) {
        if count > 0 {
            self.arrays_lost.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Publishes the estimated per-object byte size once known.
    pub fn record_object_size(&self, bytes: u64) {
        self.object_size.store(bytes, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            arrays_received: self.arrays_received.load(Ordering::Relaxed),
            arrays_lost: self.arrays_lost.load(Ordering::Relaxed),
            object_size: self.object_size.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the acquisition counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Total batches received.
    pub arrays_received: u64,
    /// Total arrays lost.
    pub arrays_lost: u64,
    /// Estimated per-object byte size (zero while unknown).
    pub object_size: u64,
}

/// Rolling array/byte rate derived from periodic snapshots.
#[derive(Debug, Default)]
pub struct RateTracker {
    last_total: u64,
    window: VecDeque<u64>,
}

impl RateTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one snapshot taken on the caller's cadence and returns the
    /// smoothed rates.
    pub fn tick(&mut self, snapshot: &MetricsSnapshot) -> RateSample {
        let delta = snapshot.arrays_received.saturating_sub(self.last_total);
        self.last_total = snapshot.arrays_received;

        self.window.push_back(delta);
        while self.window.len() > RATE_WINDOW {
            self.window.pop_front();
        }

        #[allow(clippy::cast_precision_loss)]
        let arrays_per_sec =
            self.window.iter().sum::<u64>() as f64 / self.window.len() as f64;
        #[allow(clippy::cast_precision_loss)]
        let bytes_per_sec = arrays_per_sec * snapshot.object_size as f64;

        RateSample {
            arrays_per_sec,
            bytes_per_sec,
        }
    }
}

/// One smoothed rate computation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateSample {
    /// Mean batches per interval over the rolling window.
    pub arrays_per_sec: f64,
    /// Array rate multiplied by the estimated object size.
    pub bytes_per_sec: f64,
}

/// Exponential moving average of the frame rate seen by the renderer.
#[derive(Debug, Default)]
pub struct RenderRate {
    last: Option<Instant>,
    fps: f64,
}

impl RenderRate {
    /// Creates an idle tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one rendered frame and returns the smoothed rate.
    pub fn tick(&mut self) -> f64 {
        let now = Instant::now();
        if let Some(last) = self.last.replace(now) {
            let dt = now.duration_since(last).as_secs_f64().max(1e-9);
            let s = (dt * 3.0).clamp(0.0, 1.0);
            self.fps = self.fps * (1.0 - s) + (1.0 / dt) * s;
        }
        self.fps
    }

    /// Returns the current smoothed frame rate.
    #[must_use]
    pub fn fps(&self) -> f64 {
        self.fps
    }
}
