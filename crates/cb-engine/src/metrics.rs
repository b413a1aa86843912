//! Cycle outcome metrics
//!
//! Every cycle outcome is recorded three ways:
//! - lock-free counters on [`ActivityMetrics`], summarised by [`MetricsSummary`]
//! - the `metrics` facade (`cyclebench_*` series labelled by `alias`)
//! - registered [`CycleObserver`] sinks

use chrono::{DateTime, Utc};
use crossbeam::utils::CachePadded;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One finished cycle
#[derive(Debug, Clone, Copy)]
pub struct CycleOutcome<'a> {
    /// Cycle number
    pub cycle: i64,
    /// Op name
    pub op: &'a str,
    /// Attempts made
    pub tries: u32,
    /// Time spent in the driver across all attempts
    pub latency: Duration,
    /// Failure text of the last attempt, `None` on success
    pub error: Option<&'a str>,
}

impl CycleOutcome<'_> {
    /// Whether the cycle succeeded
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Receives every cycle outcome of an activity
pub trait CycleObserver: Send + Sync {
    /// Called on the worker thread after each cycle
    fn on_cycle(&self, alias: &str, outcome: &CycleOutcome<'_>);
}

/// Counters for one activity
pub struct ActivityMetrics {
    alias: String,
    started_at: RwLock<DateTime<Utc>>,
    cycles: CachePadded<AtomicU64>,
    successes: CachePadded<AtomicU64>,
    failures: CachePadded<AtomicU64>,
    retries: CachePadded<AtomicU64>,
    latency_nanos: CachePadded<AtomicU64>,
    cycles_counter: metrics::Counter,
    failures_counter: metrics::Counter,
    retries_counter: metrics::Counter,
    latency_histogram: metrics::Histogram,
    observers: RwLock<Vec<Arc<dyn CycleObserver>>>,
}

impl ActivityMetrics {
    /// Metrics for `alias`
    #[must_use]
    pub fn new(alias: &str) -> Self {
        let label = alias.to_string();
        Self {
            alias: label.clone(),
            started_at: RwLock::new(Utc::now()),
            cycles: CachePadded::new(AtomicU64::new(0)),
            successes: CachePadded::new(AtomicU64::new(0)),
            failures: CachePadded::new(AtomicU64::new(0)),
            retries: CachePadded::new(AtomicU64::new(0)),
            latency_nanos: CachePadded::new(AtomicU64::new(0)),
            cycles_counter: metrics::counter!("cyclebench_cycles_total", "alias" => label.clone()),
            failures_counter: metrics::counter!("cyclebench_failures_total", "alias" => label.clone()),
            retries_counter: metrics::counter!("cyclebench_retries_total", "alias" => label.clone()),
            latency_histogram: metrics::histogram!("cyclebench_op_latency_seconds", "alias" => label),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register an outcome sink
    pub fn add_observer(&self, observer: Arc<dyn CycleObserver>) {
        self.observers.write().push(observer);
    }

    /// Record one finished cycle
    pub fn record(&self, outcome: &CycleOutcome<'_>) {
        let nanos = u64::try_from(outcome.latency.as_nanos()).unwrap_or(u64::MAX);
        let retries = u64::from(outcome.tries.saturating_sub(1));

        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.latency_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.cycles_counter.increment(1);
        self.latency_histogram.record(outcome.latency.as_secs_f64());
        if retries > 0 {
            self.retries.fetch_add(retries, Ordering::Relaxed);
            self.retries_counter.increment(retries);
        }
        if outcome.is_success() {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
            self.failures_counter.increment(1);
        }

        for observer in self.observers.read().iter() {
            observer.on_cycle(&self.alias, outcome);
        }
    }

    /// Mark the start of a run
    pub fn mark_started(&self) {
        *self.started_at.write() = Utc::now();
    }

    /// Cycles recorded
    #[inline]
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Successful cycles
    #[inline]
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Failed cycles
    #[inline]
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Extra attempts across all cycles
    #[inline]
    #[must_use]
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Point-in-time summary
    #[must_use]
    pub fn summary(&self) -> MetricsSummary {
        let cycles = self.cycles();
        let started_at = *self.started_at.read();
        let elapsed = (Utc::now() - started_at).to_std().unwrap_or_default();
        let total_latency = Duration::from_nanos(self.latency_nanos.load(Ordering::Relaxed));
        #[allow(clippy::cast_precision_loss)]
        let mean_latency_ms = if cycles == 0 {
            0.0
        } else {
            total_latency.as_secs_f64() * 1_000.0 / cycles as f64
        };
        #[allow(clippy::cast_precision_loss)]
        let cycles_per_sec = if elapsed.is_zero() {
            0.0
        } else {
            cycles as f64 / elapsed.as_secs_f64()
        };
        MetricsSummary {
            alias: self.alias.clone(),
            started_at,
            cycles,
            successes: self.successes(),
            failures: self.failures(),
            retries: self.retries(),
            mean_latency_ms,
            cycles_per_sec,
        }
    }
}

impl fmt::Debug for ActivityMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityMetrics")
            .field("alias", &self.alias)
            .field("cycles", &self.cycles())
            .field("failures", &self.failures())
            .finish_non_exhaustive()
    }
}

/// Counters of one activity at a point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    /// Activity alias
    pub alias: String,
    /// When the current run started
    pub started_at: DateTime<Utc>,
    /// Cycles recorded
    pub cycles: u64,
    /// Successful cycles
    pub successes: u64,
    /// Failed cycles
    pub failures: u64,
    /// Extra attempts
    pub retries: u64,
    /// Mean driver time per cycle
    pub mean_latency_ms: f64,
    /// Observed throughput since start
    pub cycles_per_sec: f64,
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: cycles={} ok={} failed={} retries={} mean={:.3}ms rate={:.1}/s",
            self.alias,
            self.cycles,
            self.successes,
            self.failures,
            self.retries,
            self.mean_latency_ms,
            self.cycles_per_sec
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<(i64, bool)>>);

    impl CycleObserver for Collect {
        fn on_cycle(&self, _alias: &str, outcome: &CycleOutcome<'_>) {
            self.0.lock().push((outcome.cycle, outcome.is_success()));
        }
    }

    #[test]
    fn records_counts_and_notifies() {
        let metrics = ActivityMetrics::new("m");
        let sink = Arc::new(Collect::default());
        metrics.add_observer(sink.clone());

        metrics.record(&CycleOutcome {
            cycle: 1,
            op: "a",
            tries: 1,
            latency: Duration::from_millis(2),
            error: None,
        });
        metrics.record(&CycleOutcome {
            cycle: 2,
            op: "a",
            tries: 3,
            latency: Duration::from_millis(4),
            error: Some("boom"),
        });

        let summary = metrics.summary();
        assert_eq!((summary.cycles, summary.successes, summary.failures, summary.retries), (2, 1, 1, 2));
        assert!((summary.mean_latency_ms - 3.0).abs() < 1e-6);
        assert_eq!(*sink.0.lock(), vec![(1, true), (2, false)]);
        assert!(summary.to_string().starts_with("m: cycles=2 ok=1 failed=1 retries=2"));
    }
}
