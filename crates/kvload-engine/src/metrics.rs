use metrics::{Counter, Gauge};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub const GET_OPERATIONS: &str = "get_operations_count";
pub const PUT_OPERATIONS: &str = "put_operations_count";
pub const GET_ERRORS: &str = "get_errors_count";
pub const PUT_ERRORS: &str = "put_errors_count";
pub const KEYS_FOUND: &str = "keys_found_count";
pub const KEYS_NOT_FOUND: &str = "keys_not_found_count";
pub const OPERATIONS_PER_SECOND: &str = "operations_per_second";

/// The throughput gauge is recomputed every this many total operations.
pub const THROUGHPUT_REFRESH_EVERY: u64 = 100;

/// Static labels attached to every exported series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricLabels {
    pub workers: usize,
    pub batch_size: usize,
}

/// Counter kept in an atomic for local reads and mirrored into the
/// installed `metrics` recorder (a no-op when none is installed).
struct TrackedCounter {
    value: AtomicU64,
    handle: Counter,
}

impl TrackedCounter {
    fn register(name: &'static str, labels: MetricLabels) -> Self {
        let handle = metrics::counter!(
            name,
            "workers" => labels.workers.to_string(),
            "batch_size" => labels.batch_size.to_string()
        );
        Self {
            value: AtomicU64::new(0),
            handle,
        }
    }

    fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
        self.handle.increment(n);
    }

    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge stored as `f64` bits so it can be overwritten atomically.
struct TrackedGauge {
    bits: AtomicU64,
    handle: Gauge,
}

impl TrackedGauge {
    fn register(name: &'static str, labels: MetricLabels) -> Self {
        let handle = metrics::gauge!(
            name,
            "workers" => labels.workers.to_string(),
            "batch_size" => labels.batch_size.to_string()
        );
        Self {
            bits: AtomicU64::new(0f64.to_bits()),
            handle,
        }
    }

    fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
        self.handle.set(value);
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Process-wide load counters, shared by every worker.
///
/// Each field is independently atomic. Readers see a consistent value per
/// field but no cross-field snapshot guarantee.
pub struct LoadMetrics {
    get_operations: TrackedCounter,
    put_operations: TrackedCounter,
    get_errors: TrackedCounter,
    put_errors: TrackedCounter,
    keys_found: TrackedCounter,
    keys_not_found: TrackedCounter,
    operations_per_second: TrackedGauge,
    total_operations: AtomicU64,
    started_at: Instant,
    labels: MetricLabels,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub workers: usize,
    pub batch_size: usize,
    pub get_operations: u64,
    pub put_operations: u64,
    pub get_errors: u64,
    pub put_errors: u64,
    pub keys_found: u64,
    pub keys_not_found: u64,
    pub total_operations: u64,
    pub operations_per_second: f64,
    pub uptime_seconds: u64,
}

impl LoadMetrics {
    pub fn new(labels: MetricLabels) -> Self {
        Self {
            get_operations: TrackedCounter::register(GET_OPERATIONS, labels),
            put_operations: TrackedCounter::register(PUT_OPERATIONS, labels),
            get_errors: TrackedCounter::register(GET_ERRORS, labels),
            put_errors: TrackedCounter::register(PUT_ERRORS, labels),
            keys_found: TrackedCounter::register(KEYS_FOUND, labels),
            keys_not_found: TrackedCounter::register(KEYS_NOT_FOUND, labels),
            operations_per_second: TrackedGauge::register(OPERATIONS_PER_SECOND, labels),
            total_operations: AtomicU64::new(0),
            started_at: Instant::now(),
            labels,
        }
    }

    /// Register help text with the installed recorder.
    pub fn describe() {
        metrics::describe_counter!(GET_OPERATIONS, "Successful existence checks");
        metrics::describe_counter!(PUT_OPERATIONS, "Successful batch inserts");
        metrics::describe_counter!(GET_ERRORS, "Failed existence checks");
        metrics::describe_counter!(PUT_ERRORS, "Failed batch inserts");
        metrics::describe_counter!(KEYS_FOUND, "Keys reported present by existence checks");
        metrics::describe_counter!(KEYS_NOT_FOUND, "Keys reported absent by existence checks");
        metrics::describe_gauge!(
            OPERATIONS_PER_SECOND,
            "Total operations divided by seconds since start"
        );
    }

    /// A successful Get with its per-key outcome counts.
    pub fn record_get(&self, found: u64, not_found: u64) {
        self.get_operations.add(1);
        if found > 0 {
            self.keys_found.add(found);
        }
        if not_found > 0 {
            self.keys_not_found.add(not_found);
        }
    }

    pub fn record_get_error(&self) {
        self.get_errors.add(1);
    }

    pub fn record_put(&self) {
        self.put_operations.add(1);
    }

    pub fn record_put_error(&self) {
        self.put_errors.add(1);
    }

    /// Count one completed iteration. Every
    /// [`THROUGHPUT_REFRESH_EVERY`]th call refreshes the throughput gauge.
    /// Returns the new total.
    pub fn record_operation(&self) -> u64 {
        let total = self.total_operations.fetch_add(1, Ordering::Relaxed) + 1;
        if total % THROUGHPUT_REFRESH_EVERY == 0 {
            self.refresh_throughput(total);
        }
        total
    }

    fn refresh_throughput(&self, total: u64) {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        let rate = total as f64 / elapsed;
        if rate.is_finite() {
            self.operations_per_second.set(rate);
        }
    }

    pub fn total_operations(&self) -> u64 {
        self.total_operations.load(Ordering::Relaxed)
    }

    pub fn operations_per_second(&self) -> f64 {
        self.operations_per_second.get()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn labels(&self) -> MetricLabels {
        self.labels
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            workers: self.labels.workers,
            batch_size: self.labels.batch_size,
            get_operations: self.get_operations.get(),
            put_operations: self.put_operations.get(),
            get_errors: self.get_errors.get(),
            put_errors: self.put_errors.get(),
            keys_found: self.keys_found.get(),
            keys_not_found: self.keys_not_found.get(),
            total_operations: self.total_operations(),
            operations_per_second: self.operations_per_second(),
            uptime_seconds: self.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn labels() -> MetricLabels {
        MetricLabels {
            workers: 4,
            batch_size: 10,
        }
    }

    #[test]
    fn starts_at_zero() {
        let m = LoadMetrics::new(labels());
        let snap = m.snapshot();
        assert_eq!(snap.total_operations, 0);
        assert_eq!(snap.get_operations, 0);
        assert_eq!(snap.operations_per_second, 0.0);
        assert_eq!(snap.workers, 4);
        assert_eq!(snap.batch_size, 10);
    }

    #[test]
    fn get_updates_found_and_missing() {
        let m = LoadMetrics::new(labels());
        m.record_get(2, 3);
        m.record_get(0, 1);
        m.record_get_error();
        let snap = m.snapshot();
        assert_eq!(snap.get_operations, 2);
        assert_eq!(snap.keys_found, 2);
        assert_eq!(snap.keys_not_found, 4);
        assert_eq!(snap.get_errors, 1);
    }

    #[test]
    fn throughput_refreshes_on_hundredth_operation() {
        let m = LoadMetrics::new(labels());
        std::thread::sleep(Duration::from_millis(5));
        for _ in 0..THROUGHPUT_REFRESH_EVERY - 1 {
            m.record_operation();
        }
        assert_eq!(m.operations_per_second(), 0.0);

        assert_eq!(m.record_operation(), THROUGHPUT_REFRESH_EVERY);
        let rate = m.operations_per_second();
        assert!(rate.is_finite());
        assert!(rate > 0.0);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let m = Arc::new(LoadMetrics::new(labels()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&m);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        m.record_get(1, 1);
                        m.record_put();
                        m.record_operation();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = m.snapshot();
        assert_eq!(snap.total_operations, 8000);
        assert_eq!(snap.get_operations, 8000);
        assert_eq!(snap.put_operations, 8000);
        assert_eq!(snap.keys_found, 8000);
        assert!(snap.operations_per_second >= 0.0);
        assert!(snap.operations_per_second.is_finite());
    }
}
