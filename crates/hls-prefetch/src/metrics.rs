use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::info;

/// Engine-wide counters.
///
/// Updated only on behalf of the active request for a playlist; a superseded
/// request never touches them after it has been cancelled.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Prefetch requests started
    pub requests_started: AtomicU64,
    /// Requests that resolved their playlist and settled every segment
    pub requests_completed: AtomicU64,
    /// Requests that failed at the playlist level
    pub requests_failed: AtomicU64,
    /// Requests cancelled or superseded
    pub requests_cancelled: AtomicU64,
    /// Segment fetches that completed successfully
    pub segments_fetched: AtomicU64,
    /// Segment fetches that failed
    pub segments_failed: AtomicU64,
    /// Body bytes of successfully fetched segments
    pub segment_bytes: AtomicU64,
}

/// Plain copy of [`EngineMetrics`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub requests_started: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
    pub requests_cancelled: u64,
    pub segments_fetched: u64,
    pub segments_failed: u64,
    pub segment_bytes: u64,
}

impl MetricsSnapshot {
    /// Percentage of attempted segments that were fetched.
    pub fn segment_success_rate(&self) -> f64 {
        let attempted = self.segments_fetched + self.segments_failed;
        if attempted == 0 {
            0.0
        } else {
            (self.segments_fetched as f64 / attempted as f64) * 100.0
        }
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request_started(&self) {
        self.requests_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_completed(&self) {
        self.requests_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_cancelled(&self) {
        self.requests_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_segment_fetched(&self, bytes: u64) {
        self.segments_fetched.fetch_add(1, Ordering::Relaxed);
        self.segment_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_segment_failed(&self) {
        self.segments_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_started: self.requests_started.load(Ordering::Relaxed),
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            requests_cancelled: self.requests_cancelled.load(Ordering::Relaxed),
            segments_fetched: self.segments_fetched.load(Ordering::Relaxed),
            segments_failed: self.segments_failed.load(Ordering::Relaxed),
            segment_bytes: self.segment_bytes.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let snapshot = self.snapshot();
        if snapshot.requests_started == 0 {
            return;
        }
        info!(
            requests_started = snapshot.requests_started,
            requests_completed = snapshot.requests_completed,
            requests_failed = snapshot.requests_failed,
            requests_cancelled = snapshot.requests_cancelled,
            segments_fetched = snapshot.segments_fetched,
            segments_failed = snapshot.segments_failed,
            segment_bytes = snapshot.segment_bytes,
            segment_success_rate = format!("{:.1}%", snapshot.segment_success_rate()),
            "Prefetch engine summary"
        );
    }
}
