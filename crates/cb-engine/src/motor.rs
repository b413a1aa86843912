//! Worker motors
//!
//! A [`Motor`] is the loop run by one worker thread: claim a segment of
//! cycles, pace, resolve the op for each cycle, execute it and record the
//! outcome. The thread body is wrapped by an [`ActivityExceptionHandler`]
//! so a panic or loop error becomes the activity failure instead of a
//! silently lost thread.
//!
//! # Critical Invariant
//!
//! A motor belongs to one run generation. Once the executor moves to a
//! newer generation (after `force_stop` or a restart) the motor stops
//! claiming cycles and none of its outcomes are recorded. Only a current
//! motor gives unrun cycles back to the cursor.

use crate::activity::Activity;
use crate::activity_def::ErrorPolicy;
use crate::driver::{OpResult, ResolvedOp, WorkerContext};
use crate::error::{ActivityError, DriverError};
use crate::executor::ExecutorShared;
use crate::metrics::CycleOutcome;
use crate::run_state::RunState;
use std::any::Any;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-run worker settings, refreshed when the activity params change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MotorSettings {
    pub(crate) policy: ErrorPolicy,
    pub(crate) max_tries: u32,
    pub(crate) stride: usize,
}

/// The cycle loop of one worker
pub(crate) struct Motor {
    slot: usize,
    generation: u64,
    shared: Arc<ExecutorShared>,
    activity: Arc<Activity>,
    stop: Arc<AtomicBool>,
    interrupt: Arc<AtomicBool>,
    settings: MotorSettings,
    settings_version: u64,
}

impl Motor {
    pub(crate) fn new(
        slot: usize,
        generation: u64,
        shared: Arc<ExecutorShared>,
        activity: Arc<Activity>,
        stop: Arc<AtomicBool>,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        let settings_version = shared.def().params().version();
        let settings = shared.settings();
        Self {
            slot,
            generation,
            shared,
            activity,
            stop,
            interrupt,
            settings,
            settings_version,
        }
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire) || self.shared.should_stop(self.generation)
    }

    fn refresh_settings(&mut self) {
        let version = self.shared.def().params().version();
        if version != self.settings_version {
            self.settings_version = version;
            self.settings = self.shared.settings();
        }
    }

    /// Run until the cursor is exhausted or a stop is requested
    pub(crate) fn run(mut self) -> Result<(), ActivityError> {
        if !self.shared.is_current(self.generation) {
            return Ok(());
        }
        self.shared.tally().change(Some(RunState::Starting), RunState::Running);
        tracing::debug!(alias = self.activity.alias(), slot = self.slot, "motor running");

        let mut ctx = WorkerContext::new(self.activity.alias(), self.slot, Arc::clone(&self.interrupt));
        let mut op = ResolvedOp::default();
        'claims: while !self.should_stop() {
            self.refresh_settings();
            let Some(segment) = self.shared.cursor().claim(self.settings.stride) else {
                break;
            };
            for cycle in segment.clone() {
                if self.should_stop() || !self.shared.limiter().acquire(|| self.should_stop()) {
                    self.give_back(cycle..segment.end);
                    break 'claims;
                }
                self.run_cycle(cycle, &mut op, &mut ctx)?;
            }
        }
        Ok(())
    }

    fn give_back(&self, unrun: Range<i64>) {
        if self.shared.is_current(self.generation) {
            self.shared.cursor().give_back(unrun);
        }
    }

    fn run_cycle(&self, cycle: i64, op: &mut ResolvedOp, ctx: &mut WorkerContext) -> Result<(), ActivityError> {
        let template = self.activity.sequence().get(cycle);
        if let Err(err) = template.apply_into(cycle, op.reset(template.name(), cycle)) {
            return self.finish_cycle(cycle, template.name(), 0, Duration::ZERO, Err(err.to_string()));
        }

        let driver = self.activity.driver();
        let max_tries = self.settings.max_tries.max(1);
        let started = Instant::now();
        let mut tries = 0;
        let result: Result<OpResult, DriverError> = loop {
            tries += 1;
            match driver.execute(op, ctx) {
                Err(err) if err.is_retryable() && tries < max_tries && !self.should_stop() => {
                    tracing::trace!(alias = self.activity.alias(), slot = self.slot, cycle, tries, error = %err, "retrying op");
                }
                other => break other,
            }
        };
        let latency = started.elapsed();
        self.finish_cycle(cycle, op.name(), tries, latency, result.map_err(|e| e.to_string()))
    }

    fn finish_cycle(
        &self,
        cycle: i64,
        op: &str,
        tries: u32,
        latency: Duration,
        result: Result<OpResult, String>,
    ) -> Result<(), ActivityError> {
        if !self.shared.is_current(self.generation) {
            return Ok(());
        }
        let error = result.as_ref().err().map(String::as_str);
        self.shared.metrics().record(&CycleOutcome {
            cycle,
            op,
            tries,
            latency,
            error,
        });
        let Some(message) = error else {
            return Ok(());
        };
        let alias = self.activity.alias();
        match self.settings.policy {
            ErrorPolicy::Count => {
                tracing::debug!(alias, slot = self.slot, op, cycle, tries, error = message, "cycle failed");
                Ok(())
            }
            ErrorPolicy::Warn => {
                tracing::warn!(alias, slot = self.slot, op, cycle, tries, error = message, "cycle failed");
                Ok(())
            }
            ErrorPolicy::Stop => Err(ActivityError::OpFailed {
                alias: alias.to_string(),
                op: op.to_string(),
                cycle,
                message: message.to_string(),
            }),
        }
    }
}

/// Wraps a worker thread body and reports how it ended
///
/// Panics and loop errors are recorded as the activity failure; every exit
/// is reported to the executor so the activity can settle its state.
pub(crate) struct ActivityExceptionHandler {
    shared: Arc<ExecutorShared>,
    slot: usize,
    generation: u64,
}

impl ActivityExceptionHandler {
    pub(crate) fn new(shared: Arc<ExecutorShared>, slot: usize, generation: u64) -> Self {
        Self {
            shared,
            slot,
            generation,
        }
    }

    pub(crate) fn run(self, body: impl FnOnce() -> Result<(), ActivityError>) {
        let failure = match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(payload) => Some(ActivityError::WorkerPanic {
                alias: self.shared.alias().to_string(),
                slot: self.slot,
                message: panic_message(payload.as_ref()),
            }),
        };
        if let Some(err) = &failure {
            tracing::error!(alias = self.shared.alias(), slot = self.slot, error = %err, "worker failed");
        }
        self.shared.motor_exited(self.slot, self.generation, failure);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payload_text() {
        let caught = panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom 1");
        let caught = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "static");
        let caught = panic::catch_unwind(|| std::panic::panic_any(7_u8)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "non-string panic payload");
    }
}
