//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only; do NOT use them for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries for submit latency (milliseconds)
/// Buckets: ≤25, ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, >12800
const BUCKET_BOUNDS: [u64; 10] = [25, 50, 100, 200, 400, 800, 1600, 3200, 6400, 12800];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [25, 50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// Capture counters are monotonic; submit latency is periodic and reset by
/// `report()`.
pub struct Metrics {
    /// Printable keys fed to the wedge decoder
    keys_received: AtomicU64,
    /// Codes emitted by either capture path
    codes_recognized: AtomicU64,
    /// Wedge buffers discarded by the idle gap
    wedge_buffers_discarded: AtomicU64,
    frames_decoded: AtomicU64,
    frames_unreadable: AtomicU64,
    capture_sessions_started: AtomicU64,
    capture_faults: AtomicU64,
    scans_submitted: AtomicU64,
    scans_failed: AtomicU64,
    batches_submitted: AtomicU64,
    batch_items_accepted: AtomicU64,
    batch_items_rejected: AtomicU64,
    /// Submit latency histogram (reset on report)
    submit_latency_buckets: [AtomicU64; NUM_BUCKETS],
    submit_latency_sum_ms: AtomicU64,
    submit_latency_max_ms: AtomicU64,
    submits_since_report: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            keys_received: AtomicU64::new(0),
            codes_recognized: AtomicU64::new(0),
            wedge_buffers_discarded: AtomicU64::new(0),
            frames_decoded: AtomicU64::new(0),
            frames_unreadable: AtomicU64::new(0),
            capture_sessions_started: AtomicU64::new(0),
            capture_faults: AtomicU64::new(0),
            scans_submitted: AtomicU64::new(0),
            scans_failed: AtomicU64::new(0),
            batches_submitted: AtomicU64::new(0),
            batch_items_accepted: AtomicU64::new(0),
            batch_items_rejected: AtomicU64::new(0),
            submit_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            submit_latency_sum_ms: AtomicU64::new(0),
            submit_latency_max_ms: AtomicU64::new(0),
            submits_since_report: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_key(&self) {
        self.keys_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_code_recognized(&self) {
        self.codes_recognized.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_wedge_discard(&self) {
        self.wedge_buffers_discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_frame(&self, decoded: bool) {
        if decoded {
            self.frames_decoded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.frames_unreadable.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_capture_started(&self) {
        self.capture_sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_capture_fault(&self) {
        self.capture_faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a single-scan submission outcome with its round-trip latency
    #[inline]
    pub fn record_scan(&self, accepted: bool, latency_ms: u64) {
        if accepted {
            self.scans_submitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.scans_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.record_submit_latency(latency_ms);
    }

    /// Record a batch outcome; `accepted`/`rejected` count items
    #[inline]
    pub fn record_batch(&self, accepted: u64, rejected: u64, latency_ms: u64) {
        self.batches_submitted.fetch_add(1, Ordering::Relaxed);
        self.batch_items_accepted.fetch_add(accepted, Ordering::Relaxed);
        self.batch_items_rejected.fetch_add(rejected, Ordering::Relaxed);
        self.record_submit_latency(latency_ms);
    }

    #[inline]
    fn record_submit_latency(&self, latency_ms: u64) {
        self.submits_since_report.fetch_add(1, Ordering::Relaxed);
        self.submit_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.submit_latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.submit_latency_max_ms, latency_ms);
    }

    #[inline]
    pub fn scans_submitted(&self) -> u64 {
        self.scans_submitted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn scans_failed(&self) -> u64 {
        self.scans_failed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn codes_recognized(&self) -> u64 {
        self.codes_recognized.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        let submits = self.submits_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.submit_latency_sum_ms.swap(0, Ordering::Relaxed);
        let latency_max = self.submit_latency_max_ms.swap(0, Ordering::Relaxed);
        let latency_buckets = swap_buckets(&self.submit_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };
        let submits_per_min = if elapsed.as_secs_f64() > 0.0 {
            submits as f64 * 60.0 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary {
            keys_received: self.keys_received.load(Ordering::Relaxed),
            codes_recognized: self.codes_recognized.load(Ordering::Relaxed),
            wedge_buffers_discarded: self.wedge_buffers_discarded.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_unreadable: self.frames_unreadable.load(Ordering::Relaxed),
            capture_sessions_started: self.capture_sessions_started.load(Ordering::Relaxed),
            capture_faults: self.capture_faults.load(Ordering::Relaxed),
            scans_submitted: self.scans_submitted.load(Ordering::Relaxed),
            scans_failed: self.scans_failed.load(Ordering::Relaxed),
            batches_submitted: self.batches_submitted.load(Ordering::Relaxed),
            batch_items_accepted: self.batch_items_accepted.load(Ordering::Relaxed),
            batch_items_rejected: self.batch_items_rejected.load(Ordering::Relaxed),
            submits_per_min,
            submit_latency_buckets: latency_buckets,
            submit_latency_avg_ms: if submits > 0 { latency_sum / submits } else { 0 },
            submit_latency_max_ms: latency_max,
            submit_latency_p50_ms: percentile_from_buckets(&latency_buckets, 0.50),
            submit_latency_p99_ms: percentile_from_buckets(&latency_buckets, 0.99),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub keys_received: u64,
    pub codes_recognized: u64,
    pub wedge_buffers_discarded: u64,
    pub frames_decoded: u64,
    pub frames_unreadable: u64,
    pub capture_sessions_started: u64,
    pub capture_faults: u64,
    pub scans_submitted: u64,
    pub scans_failed: u64,
    pub batches_submitted: u64,
    pub batch_items_accepted: u64,
    pub batch_items_rejected: u64,
    pub submits_per_min: f64,
    /// Bounds: ≤25, ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, >12800 ms
    pub submit_latency_buckets: [u64; NUM_BUCKETS],
    pub submit_latency_avg_ms: u64,
    pub submit_latency_max_ms: u64,
    pub submit_latency_p50_ms: u64,
    pub submit_latency_p99_ms: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            keys = %self.keys_received,
            codes = %self.codes_recognized,
            wedge_discards = %self.wedge_buffers_discarded,
            frames_decoded = %self.frames_decoded,
            frames_unreadable = %self.frames_unreadable,
            capture_faults = %self.capture_faults,
            scans_ok = %self.scans_submitted,
            scans_failed = %self.scans_failed,
            batches = %self.batches_submitted,
            batch_accepted = %self.batch_items_accepted,
            batch_rejected = %self.batch_items_rejected,
            submits_per_min = format!("{:.1}", self.submits_per_min),
            avg_ms = %self.submit_latency_avg_ms,
            p99_ms = %self.submit_latency_p99_ms,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.scans_submitted(), 0);
        assert_eq!(metrics.codes_recognized(), 0);
    }

    #[test]
    fn test_record_scan() {
        let metrics = Metrics::new();
        metrics.record_scan(true, 40);
        metrics.record_scan(false, 120);
        assert_eq!(metrics.scans_submitted(), 1);
        assert_eq!(metrics.scans_failed(), 1);
        assert_eq!(metrics.submit_latency_sum_ms.load(Ordering::Relaxed), 160);
        assert_eq!(metrics.submit_latency_max_ms.load(Ordering::Relaxed), 120);
    }

    #[test]
    fn test_report_resets_latency_only() {
        let metrics = Metrics::new();
        metrics.record_scan(true, 10);
        metrics.record_scan(true, 20);
        metrics.record_scan(true, 30);
        metrics.record_batch(3, 1, 60);
        metrics.record_frame(true);
        metrics.record_frame(false);

        let summary = metrics.report();
        assert_eq!(summary.scans_submitted, 3);
        assert_eq!(summary.batch_items_accepted, 3);
        assert_eq!(summary.batch_items_rejected, 1);
        assert_eq!(summary.submit_latency_avg_ms, 30); // (10+20+30+60)/4
        assert_eq!(summary.submit_latency_max_ms, 60);
        assert_eq!(summary.frames_decoded, 1);
        assert_eq!(summary.frames_unreadable, 1);

        let summary = metrics.report();
        assert_eq!(summary.scans_submitted, 3);
        assert_eq!(summary.submit_latency_avg_ms, 0);
        assert_eq!(summary.submit_latency_max_ms, 0);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    m.record_code_recognized();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.codes_recognized(), 10_000);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(25), 0);
        assert_eq!(bucket_index(26), 1);
        assert_eq!(bucket_index(12800), 9);
        assert_eq!(bucket_index(12801), 10); // overflow
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();
        for _ in 0..100 {
            metrics.record_scan(true, 150); // bucket 3 (≤200)
        }
        let summary = metrics.report();
        assert_eq!(summary.submit_latency_p50_ms, 200);
        assert_eq!(summary.submit_latency_p99_ms, 200);
    }
}
