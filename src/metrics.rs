use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding window of processing latencies with percentile queries
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: Arc<Mutex<VecDeque<u64>>>,
    window_size: usize,
}

impl LatencyWindow {
    pub fn new(window_size: usize) -> Self {
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size,
        }
    }

    /// Record one latency sample in nanoseconds
    pub fn record(&self, nanos: u64) {
        let mut samples = self.samples.lock();
        if samples.len() >= self.window_size {
            samples.pop_front();
        }
        samples.push_back(nanos);
    }

    fn percentile_us(&self, p: f64) -> f64 {
        let samples = self.samples.lock();
        if samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<_> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx] as f64 / 1000.0
    }

    /// Median latency in microseconds
    pub fn p50_us(&self) -> f64 {
        self.percentile_us(0.50)
    }

    /// 95th percentile latency in microseconds
    pub fn p95_us(&self) -> f64 {
        self.percentile_us(0.95)
    }

    /// 99th percentile latency in microseconds
    pub fn p99_us(&self) -> f64 {
        self.percentile_us(0.99)
    }
}

/// Per-stage counters, shared by every worker of one stage.
///
/// Monitoring only; no pipeline behavior depends on these values.
#[derive(Debug, Clone)]
pub struct StageMetrics {
    items_taken: Arc<AtomicU64>,
    items_emitted: Arc<AtomicU64>,
    latency: LatencyWindow,
    start_time: Instant,
}

impl StageMetrics {
    pub fn new() -> Self {
        Self {
            items_taken: Arc::new(AtomicU64::new(0)),
            items_emitted: Arc::new(AtomicU64::new(0)),
            latency: LatencyWindow::new(1024),
            start_time: Instant::now(),
        }
    }

    /// Record one item taken from the stage's inputs
    pub fn record_taken(&self) {
        self.items_taken.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one item routed into the stage's outputs
    pub fn record_emitted(&self) {
        self.items_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one transform latency in nanoseconds
    pub fn record_latency(&self, nanos: u64) {
        self.latency.record(nanos);
    }

    /// Total items taken from the inputs
    pub fn taken(&self) -> u64 {
        self.items_taken.load(Ordering::Relaxed)
    }

    /// Total items routed downstream
    pub fn emitted(&self) -> u64 {
        self.items_emitted.load(Ordering::Relaxed)
    }

    /// Items taken per second since the stage was created
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.taken() as f64 / elapsed
        }
    }

    /// Capture the current values
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            taken: self.taken(),
            emitted: self.emitted(),
            throughput: self.throughput(),
            latency_p50_us: self.latency.p50_us(),
            latency_p95_us: self.latency.p95_us(),
            latency_p99_us: self.latency.p99_us(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for StageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of one stage's metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub taken: u64,
    pub emitted: u64,
    pub throughput: f64,
    pub latency_p50_us: f64,
    pub latency_p95_us: f64,
    pub latency_p99_us: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Format as a single human-readable line
    pub fn format(&self) -> String {
        format!(
            "taken: {}, emitted: {}, throughput: {:.2} items/s, \
             latency p50: {:.2}µs, p95: {:.2}µs, p99: {:.2}µs, elapsed: {:.2}s",
            self.taken,
            self.emitted,
            self.throughput,
            self.latency_p50_us,
            self.latency_p95_us,
            self.latency_p99_us,
            self.elapsed.as_secs_f64()
        )
    }
}
