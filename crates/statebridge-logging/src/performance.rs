// ABOUTME: Latency sampling for bridge operations using tracing spans
// ABOUTME: PerfTimer guards individual operations, PerformanceMonitor keeps rolling windows per label

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{Level, Span, field, span, warn};

/// Scope guard for a single bridge operation.
///
/// Opens a `bridge_op` span and fills in `elapsed_ms` when dropped. With a
/// budget set, overrunning it logs the same warning the monitor uses.
pub struct PerfTimer {
    label: String,
    span: Span,
    started: Instant,
    budget: Option<Duration>,
}

impl PerfTimer {
    pub fn new(label: &str) -> Self {
        Self {
            span: span!(Level::DEBUG, "bridge_op", label, elapsed_ms = field::Empty),
            label: label.to_owned(),
            started: Instant::now(),
            budget: None,
        }
    }

    pub fn with_warn_threshold(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stop now; the span and any budget warning are emitted here.
    pub fn finish(self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        self.span.record("elapsed_ms", elapsed.as_secs_f64() * 1000.0);
        if self.budget.is_some_and(|budget| elapsed > budget) {
            warn!(
                operation = %self.label,
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow operation detected"
            );
        }
    }
}

/// `timed!("memory.sweep", { ... })` runs the block under a [`PerfTimer`].
#[macro_export]
macro_rules! timed {
    ($label:expr, $body:block) => {{
        let _guard = $crate::performance::PerfTimer::new($label);
        $body
    }};
    ($label:expr, warn_threshold: $budget:expr, $body:block) => {{
        let _guard = $crate::performance::PerfTimer::new($label).with_warn_threshold($budget);
        $body
    }};
}

/// Latency summary for one label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct LatencyStats {
    #[serde(with = "duration_micros")]
    pub p50: Duration,
    #[serde(with = "duration_micros")]
    pub p95: Duration,
    #[serde(with = "duration_micros")]
    pub max: Duration,
    /// Total samples recorded for the label, including ones evicted from the window
    pub count: u64,
}

mod duration_micros {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX))
    }
}

#[derive(Debug, Default)]
struct LabelSamples {
    window: VecDeque<Duration>,
    count: u64,
}

/// Rolling latency windows keyed by operation label.
///
/// Purely observational: nothing here feeds back into delivery or state.
/// Lives on the bridge's single thread, so interior mutability is a `RefCell`
/// that is never borrowed while the measured closure runs.
#[derive(Debug)]
pub struct PerformanceMonitor {
    window_size: usize,
    slow_threshold: Option<Duration>,
    samples: RefCell<HashMap<String, LabelSamples>>,
}

impl PerformanceMonitor {
    pub fn new(window_size: usize, slow_threshold: Option<Duration>) -> Self {
        Self {
            window_size: window_size.max(1),
            slow_threshold,
            samples: RefCell::new(HashMap::new()),
        }
    }

    /// Run `operation`, recording its latency under `label`.
    pub fn measure<R>(&self, label: &str, operation: impl FnOnce() -> R) -> R {
        let timer = PerfTimer::new(label);
        let result = operation();
        let elapsed = timer.finish();
        self.record(label, elapsed);
        result
    }

    pub fn record(&self, label: &str, duration: Duration) {
        {
            let mut samples = self.samples.borrow_mut();
            let entry = samples.entry(label.to_string()).or_default();
            if entry.window.len() == self.window_size {
                entry.window.pop_front();
            }
            entry.window.push_back(duration);
            entry.count += 1;
        }

        let slow = self.slow_threshold.filter(|threshold| duration > *threshold);
        if let Some(threshold) = slow {
            warn!(
                operation = %label,
                elapsed_us = duration.as_micros() as u64,
                threshold_ms = threshold.as_millis() as u64,
                "Slow operation detected"
            );
        }
    }

    /// Nearest-rank percentiles over the current window.
    pub fn get_stats(&self, label: &str) -> Option<LatencyStats> {
        let samples = self.samples.borrow();
        let entry = samples.get(label)?;
        let mut sorted: Vec<Duration> = entry.window.iter().copied().collect();
        sorted.sort_unstable();

        Some(LatencyStats {
            p50: nearest_rank(&sorted, 50),
            p95: nearest_rank(&sorted, 95),
            max: sorted.last().copied().unwrap_or_default(),
            count: entry.count,
        })
    }

    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.samples.borrow().keys().cloned().collect();
        labels.sort();
        labels
    }

    pub fn reset(&self) {
        self.samples.borrow_mut().clear();
    }
}

fn nearest_rank(sorted: &[Duration], percentile: usize) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = (percentile * sorted.len()).div_ceil(100).max(1);
    sorted[rank - 1]
}
