//! Cycle rate limiting
//!
//! Paces every worker of an activity to a shared `cyclerate` target. The
//! target is re-read whenever the parameter map's change counter moves,
//! so `modify(alias, "cyclerate", ...)` takes effect on the next claim.

use crate::params::ParameterMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MAX_SLEEP: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct Pace {
    interval: Option<Duration>,
    next_at: Instant,
}

/// Shared pacing for one activity
#[derive(Debug)]
pub struct CycleRateLimiter {
    params: Arc<ParameterMap>,
    seen_version: AtomicU64,
    pace: Mutex<Pace>,
}

impl CycleRateLimiter {
    /// Limiter reading `cyclerate` from `params`
    #[must_use]
    pub fn new(params: Arc<ParameterMap>) -> Self {
        let interval = interval_for(&params);
        let limiter = Self {
            seen_version: AtomicU64::new(params.version()),
            params,
            pace: Mutex::new(Pace {
                interval,
                next_at: Instant::now(),
            }),
        };
        tracing::debug!(interval = ?interval, "rate limiter created");
        limiter
    }

    /// Current target in cycles per second, `None` when unlimited
    #[must_use]
    pub fn rate(&self) -> Option<f64> {
        self.refresh();
        self.pace.lock().interval.map(|i| 1.0 / i.as_secs_f64())
    }

    /// Wait for the next permit
    ///
    /// Sleeps in short slices and returns `false` without a permit as soon
    /// as `should_stop` reports true.
    pub fn acquire(&self, should_stop: impl Fn() -> bool) -> bool {
        self.refresh();
        let due = {
            let mut pace = self.pace.lock();
            let Some(interval) = pace.interval else {
                return true;
            };
            let now = Instant::now();
            let due = pace.next_at.max(now);
            pace.next_at = due + interval;
            due
        };
        loop {
            if should_stop() {
                return false;
            }
            let now = Instant::now();
            if now >= due {
                return true;
            }
            std::thread::sleep((due - now).min(MAX_SLEEP));
        }
    }

    /// Restart pacing from now
    pub fn reset(&self) {
        self.pace.lock().next_at = Instant::now();
    }

    fn refresh(&self) {
        let version = self.params.version();
        if self.seen_version.swap(version, Ordering::AcqRel) == version {
            return;
        }
        let interval = interval_for(&self.params);
        let mut pace = self.pace.lock();
        if pace.interval != interval {
            tracing::info!(interval = ?interval, "cycle rate changed");
            pace.interval = interval;
            pace.next_at = Instant::now();
        }
    }
}

fn interval_for(params: &ParameterMap) -> Option<Duration> {
    match params.get_optional_f64("cyclerate") {
        Ok(Some(rate)) if rate.is_finite() && rate > 0.0 => Some(Duration::from_secs_f64(1.0 / rate)),
        Ok(_) => None,
        Err(err) => {
            tracing::warn!(error = %err, "ignoring invalid cyclerate");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_without_cyclerate() {
        let limiter = CycleRateLimiter::new(Arc::new(ParameterMap::new()));
        assert_eq!(limiter.rate(), None);
        let start = Instant::now();
        for _ in 0..1_000 {
            assert!(limiter.acquire(|| false));
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn paces_to_target() {
        let params = Arc::new(ParameterMap::from_pairs([("cyclerate", "100")]));
        let limiter = CycleRateLimiter::new(params);
        let start = Instant::now();
        for _ in 0..11 {
            assert!(limiter.acquire(|| false));
        }
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn picks_up_live_changes() {
        let params = Arc::new(ParameterMap::from_pairs([("cyclerate", "1")]));
        let limiter = CycleRateLimiter::new(Arc::clone(&params));
        assert!((limiter.rate().unwrap() - 1.0).abs() < 1e-9);
        params.set("cyclerate", "0");
        assert_eq!(limiter.rate(), None);
    }

    #[test]
    fn stop_interrupts_wait() {
        let params = Arc::new(ParameterMap::from_pairs([("cyclerate", "0.01")]));
        let limiter = CycleRateLimiter::new(params);
        assert!(limiter.acquire(|| false));
        let start = Instant::now();
        assert!(!limiter.acquire(|| true));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
