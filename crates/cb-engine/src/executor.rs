//! Activity executor
//!
//! Owns the worker pool of one activity and drives its lifecycle:
//!
//! ```text
//! Created -> Starting -> Running -> Stopping -> Stopped
//!                           \-> Finished
//! ```
//!
//! `Stopped` and `Finished` both restart through `Starting`. Restarting a
//! finished activity rewinds the cycle cursor; restarting a stopped one
//! resumes where it stopped.
//!
//! # Critical Invariant
//!
//! Lifecycle state, the active worker count and the run generation only
//! change under one lock. A worker that exits from an older generation
//! changes none of them.

use crate::activity::Activity;
use crate::activity_def::ActivityDef;
use crate::config::EngineConfig;
use crate::cursor::CycleCursor;
use crate::error::ActivityError;
use crate::metrics::ActivityMetrics;
use crate::motor::{ActivityExceptionHandler, Motor, MotorSettings};
use crate::params::{ParamListener, ParameterMap};
use crate::rate::CycleRateLimiter;
use crate::run_state::{validate_transition, RunState, RunStateTally};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Lifecycle {
    state: RunState,
    active: usize,
    generation: u64,
}

impl Lifecycle {
    fn transition(&mut self, alias: &str, to: RunState) -> Result<(), ActivityError> {
        validate_transition(self.state, to)?;
        tracing::info!(alias, from = %self.state, to = %to, "activity state changed");
        self.state = to;
        Ok(())
    }

    /// Move to `Stopped`, passing through `Stopping` when needed
    fn settle_stopped(&mut self, alias: &str) -> Result<(), ActivityError> {
        if matches!(self.state, RunState::Starting | RunState::Running) {
            self.transition(alias, RunState::Stopping)?;
        }
        self.transition(alias, RunState::Stopped)
    }
}

/// State shared between the executor and its worker threads
pub(crate) struct ExecutorShared {
    alias: String,
    def: ActivityDef,
    config: EngineConfig,
    lifecycle: Mutex<Lifecycle>,
    changed: Condvar,
    generation: AtomicU64,
    stopping: AtomicBool,
    failure: Mutex<Option<ActivityError>>,
    cursor: CycleCursor,
    limiter: CycleRateLimiter,
    metrics: ActivityMetrics,
    tally: RunStateTally,
}

impl ExecutorShared {
    pub(crate) fn alias(&self) -> &str {
        &self.alias
    }

    pub(crate) fn def(&self) -> &ActivityDef {
        &self.def
    }

    pub(crate) fn cursor(&self) -> &CycleCursor {
        &self.cursor
    }

    pub(crate) fn limiter(&self) -> &CycleRateLimiter {
        &self.limiter
    }

    pub(crate) fn metrics(&self) -> &ActivityMetrics {
        &self.metrics
    }

    pub(crate) fn tally(&self) -> &RunStateTally {
        &self.tally
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    pub(crate) fn should_stop(&self, generation: u64) -> bool {
        self.stopping.load(Ordering::Acquire) || !self.is_current(generation)
    }

    pub(crate) fn settings(&self) -> MotorSettings {
        let def = &self.def;
        MotorSettings {
            policy: def
                .error_policy()
                .ok()
                .flatten()
                .unwrap_or(self.config.error_policy),
            max_tries: def.max_tries().ok().flatten().unwrap_or(self.config.max_tries),
            stride: def.stride().ok().flatten().unwrap_or(self.config.stride),
        }
    }

    /// Called exactly once by every worker thread as it ends
    pub(crate) fn motor_exited(&self, slot: usize, generation: u64, failure: Option<ActivityError>) {
        let mut life = self.lifecycle.lock();
        if life.generation != generation {
            tracing::debug!(alias = %self.alias, slot, generation, "detached worker exited");
            return;
        }
        let failed = failure.is_some();
        if let Some(err) = failure {
            self.failure.lock().get_or_insert(err);
            self.stopping.store(true, Ordering::Release);
        }
        let slot_state = if failed || self.stopping.load(Ordering::Acquire) || !self.cursor.is_exhausted() {
            RunState::Stopped
        } else {
            RunState::Finished
        };
        self.tally.change(Some(RunState::Running), slot_state);
        life.active = life.active.saturating_sub(1);
        tracing::debug!(alias = %self.alias, slot, active = life.active, "worker exited");

        if life.active == 0 {
            let finished = !self.stopping.load(Ordering::Acquire)
                && self.failure.lock().is_none()
                && self.cursor.is_exhausted();
            let settled = if finished && life.state == RunState::Running {
                life.transition(&self.alias, RunState::Finished)
            } else {
                life.settle_stopped(&self.alias)
            };
            if let Err(err) = settled {
                tracing::error!(alias = %self.alias, error = %err, "worker exit left activity unsettled");
            }
            self.changed.notify_all();
        }
    }
}

struct MotorHandle {
    slot: usize,
    stop: Arc<AtomicBool>,
    interrupt: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl MotorHandle {
    fn is_retiring(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

struct ParamsUpdateListener(Weak<ActivityExecutor>);

impl ParamListener for ParamsUpdateListener {
    fn params_changed(&self, _params: &ParameterMap) {
        if let Some(executor) = self.0.upgrade() {
            executor.handle_params_update();
        }
    }
}

/// Runs one activity on a pool of OS threads
pub struct ActivityExecutor {
    shared: Arc<ExecutorShared>,
    activity: Arc<Activity>,
    motors: Mutex<Vec<MotorHandle>>,
}

impl ActivityExecutor {
    /// Executor for a loaded activity
    ///
    /// The executor listens to `def`'s parameters: while running, a change
    /// to `threads` resizes the pool and a change to `cycles` moves the
    /// cursor's range.
    ///
    /// # Errors
    /// Returns [`ActivityError::Param`] if `cycles` is invalid.
    pub fn new(def: ActivityDef, activity: Activity, config: EngineConfig) -> Result<Arc<Self>, ActivityError> {
        let alias = activity.alias().to_string();
        let shared = Arc::new(ExecutorShared {
            cursor: CycleCursor::new(def.cycles()?),
            limiter: CycleRateLimiter::new(Arc::clone(def.params())),
            metrics: ActivityMetrics::new(&alias),
            tally: RunStateTally::new(),
            lifecycle: Mutex::new(Lifecycle {
                state: RunState::Created,
                active: 0,
                generation: 0,
            }),
            changed: Condvar::new(),
            generation: AtomicU64::new(0),
            stopping: AtomicBool::new(false),
            failure: Mutex::new(None),
            alias,
            def,
            config,
        });
        let executor = Arc::new(Self {
            shared,
            activity: Arc::new(activity),
            motors: Mutex::new(Vec::new()),
        });
        executor
            .shared
            .def
            .params()
            .add_listener(Arc::new(ParamsUpdateListener(Arc::downgrade(&executor))));
        Ok(executor)
    }

    /// Activity alias
    #[inline]
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.shared.alias
    }

    /// Activity definition, sharing the live parameters
    #[inline]
    #[must_use]
    pub fn def(&self) -> &ActivityDef {
        &self.shared.def
    }

    /// Loaded activity: op sequence and driver
    #[inline]
    #[must_use]
    pub fn activity(&self) -> &Arc<Activity> {
        &self.activity
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> RunState {
        self.shared.lifecycle.lock().state
    }

    /// Cycle counters
    #[inline]
    #[must_use]
    pub fn metrics(&self) -> &ActivityMetrics {
        &self.shared.metrics
    }

    /// Worker slot states
    #[inline]
    #[must_use]
    pub fn tally(&self) -> &RunStateTally {
        &self.shared.tally
    }

    /// Failure recorded by the last run
    #[must_use]
    pub fn failure(&self) -> Option<ActivityError> {
        self.shared.failure.lock().clone()
    }

    /// Workers currently counted as active
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.shared.lifecycle.lock().active
    }

    /// Start or restart the worker pool
    ///
    /// Starting a running activity is a no-op.
    ///
    /// # Errors
    /// Returns [`ActivityError::InvalidTransition`] while the activity is
    /// stopping, [`ActivityError::Param`] for invalid `cycles` or
    /// `threads`, and [`ActivityError::Spawn`] if a thread cannot be
    /// created. A spawn failure stops the workers already started.
    pub fn start(&self) -> Result<(), ActivityError> {
        let mut life = self.shared.lifecycle.lock();
        if matches!(life.state, RunState::Starting | RunState::Running) {
            return Ok(());
        }
        validate_transition(life.state, RunState::Starting)?;
        let range = self.shared.def.cycles()?;
        let threads = self.shared.def.threads()?;

        let rewind = matches!(life.state, RunState::Created | RunState::Finished);
        self.shared.cursor.reset(range, rewind);
        life.transition(&self.shared.alias, RunState::Starting)?;
        life.generation += 1;
        self.shared.generation.store(life.generation, Ordering::Release);
        self.shared.stopping.store(false, Ordering::Release);
        *self.shared.failure.lock() = None;
        self.shared.tally.reset();
        self.shared.limiter.reset();
        if rewind {
            self.shared.metrics.mark_started();
        }

        let mut motors = self.motors.lock();
        motors.clear();
        for slot in 0..threads {
            match self.spawn_motor(slot, life.generation) {
                Ok(handle) => {
                    motors.push(handle);
                    life.active += 1;
                }
                Err(err) => {
                    self.shared.stopping.store(true, Ordering::Release);
                    if life.active == 0 {
                        life.settle_stopped(&self.shared.alias)?;
                    } else {
                        life.transition(&self.shared.alias, RunState::Stopping)?;
                    }
                    self.shared.changed.notify_all();
                    return Err(err);
                }
            }
        }
        tracing::info!(alias = %self.shared.alias, threads, cycles = %range, rewind, "activity started");
        life.transition(&self.shared.alias, RunState::Running)
    }

    fn spawn_motor(&self, slot: usize, generation: u64) -> Result<MotorHandle, ActivityError> {
        let stop = Arc::new(AtomicBool::new(false));
        let interrupt = Arc::new(AtomicBool::new(false));
        let motor = Motor::new(
            slot,
            generation,
            Arc::clone(&self.shared),
            Arc::clone(&self.activity),
            Arc::clone(&stop),
            Arc::clone(&interrupt),
        );
        let handler = ActivityExceptionHandler::new(Arc::clone(&self.shared), slot, generation);

        self.shared.tally.change(None, RunState::Starting);
        let join = thread::Builder::new()
            .name(format!("{}:{slot}", self.shared.alias))
            .spawn(move || handler.run(move || motor.run()))
            .map_err(|e| {
                self.shared
                    .tally
                    .change(Some(RunState::Starting), RunState::Stopped);
                ActivityError::Spawn {
                    alias: self.shared.alias.clone(),
                    slot,
                    message: e.to_string(),
                }
            })?;
        Ok(MotorHandle {
            slot,
            stop,
            interrupt,
            join,
        })
    }

    /// Ask every worker to finish its current cycle and exit
    ///
    /// Waits up to the configured stop grace. Stopping an activity that is
    /// not running is a no-op. Returns whether every worker exited in time.
    pub fn stop(&self) -> bool {
        self.stop_within(self.shared.config.stop_grace())
    }

    fn stop_within(&self, grace: Duration) -> bool {
        let mut life = self.shared.lifecycle.lock();
        if !life.state.is_active() {
            return true;
        }
        if life.state != RunState::Stopping {
            if let Err(err) = life.transition(&self.shared.alias, RunState::Stopping) {
                tracing::error!(alias = %self.shared.alias, error = %err, "stop rejected");
                return false;
            }
        }
        self.shared.stopping.store(true, Ordering::Release);
        self.shared.changed.notify_all();

        let deadline = Instant::now() + grace;
        while !life.state.is_terminal() {
            if self.shared.changed.wait_until(&mut life, deadline).timed_out() {
                break;
            }
        }
        let stopped = life.state.is_terminal();
        if !stopped {
            tracing::warn!(alias = %self.shared.alias, active = life.active, "workers still running after stop grace");
        }
        stopped
    }

    /// Stop, then interrupt and detach any worker still running after `grace`
    ///
    /// The activity is `Stopped` when this returns. Outcomes from detached
    /// workers are ignored.
    pub fn force_stop(&self, grace: Duration) {
        if self.stop_within(grace) {
            return;
        }
        let mut life = self.shared.lifecycle.lock();
        if life.state.is_terminal() {
            return;
        }
        let mut motors = self.motors.lock();
        for motor in motors.iter() {
            motor.stop.store(true, Ordering::Release);
            motor.interrupt.store(true, Ordering::Release);
        }
        let detached = life.active;
        life.generation += 1;
        self.shared.generation.store(life.generation, Ordering::Release);
        life.active = 0;
        if let Err(err) = life.settle_stopped(&self.shared.alias) {
            tracing::error!(alias = %self.shared.alias, error = %err, "force stop left activity unsettled");
        }
        self.shared.tally.reset();
        motors.clear();
        self.shared.changed.notify_all();
        tracing::warn!(alias = %self.shared.alias, detached, "force stop detached workers");
    }

    /// Block until the activity completes or `timeout` elapses
    ///
    /// `None` waits without limit. Returns `Ok(true)` once the activity is
    /// `Finished` or `Stopped` without a failure, and `Ok(false)` on
    /// timeout or when the activity was never started.
    ///
    /// # Errors
    /// Returns the worker failure when the activity stopped because of one.
    pub fn await_completion(&self, timeout: Option<Duration>) -> Result<bool, ActivityError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut life = self.shared.lifecycle.lock();
        loop {
            if let Some(done) = self.completion(&life) {
                return done;
            }
            match deadline {
                Some(deadline) => {
                    if self.shared.changed.wait_until(&mut life, deadline).timed_out() {
                        return self.completion(&life).unwrap_or(Ok(false));
                    }
                }
                None => self.shared.changed.wait(&mut life),
            }
        }
    }

    fn completion(&self, life: &MutexGuard<'_, Lifecycle>) -> Option<Result<bool, ActivityError>> {
        match life.state {
            RunState::Finished => Some(Ok(true)),
            RunState::Stopped => Some(self.shared.failure.lock().clone().map_or(Ok(true), Err)),
            RunState::Created => Some(Ok(false)),
            _ => None,
        }
    }

    /// Apply live parameter changes to a running pool
    ///
    /// Moves the cursor range when `cycles` changed, then shrinks or grows
    /// the pool to `threads`. Workers removed by a shrink finish their
    /// current cycle before exiting.
    pub fn handle_params_update(&self) {
        let mut life = self.shared.lifecycle.lock();
        if life.state != RunState::Running {
            return;
        }
        match self.shared.def.cycles() {
            Ok(range) if range != self.shared.cursor.range() => {
                tracing::info!(alias = %self.shared.alias, cycles = %range, "cycle range changed");
                self.shared.cursor.reset(range, false);
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(alias = %self.shared.alias, error = %err, "ignoring invalid cycles"),
        }
        let threads = match self.shared.def.threads() {
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(alias = %self.shared.alias, error = %err, "ignoring invalid threads");
                return;
            }
        };

        let mut motors = self.motors.lock();
        motors.retain(|m| !(m.is_retiring() && m.join.is_finished()));
        let live: Vec<usize> = motors
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.is_retiring())
            .map(|(i, _)| i)
            .collect();
        if threads == live.len() {
            return;
        }
        tracing::info!(alias = %self.shared.alias, from = live.len(), to = threads, "resizing worker pool");

        if threads < live.len() {
            for index in &live[threads..] {
                motors[*index].stop.store(true, Ordering::Release);
            }
            return;
        }
        let mut slot = motors
            .iter()
            .filter(|m| !m.is_retiring())
            .map(|m| m.slot + 1)
            .max()
            .unwrap_or(0);
        for _ in live.len()..threads {
            match self.spawn_motor(slot, life.generation) {
                Ok(handle) => {
                    motors.push(handle);
                    life.active += 1;
                }
                Err(err) => {
                    tracing::error!(alias = %self.shared.alias, error = %err, "failed to grow worker pool");
                    return;
                }
            }
            slot += 1;
        }
    }
}

impl fmt::Debug for ActivityExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let life = self.shared.lifecycle.lock();
        f.debug_struct("ActivityExecutor")
            .field("alias", &self.shared.alias)
            .field("state", &life.state)
            .field("active", &life.active)
            .field("generation", &life.generation)
            .finish_non_exhaustive()
    }
}

impl Drop for ActivityExecutor {
    fn drop(&mut self) {
        self.shared.stopping.store(true, Ordering::Release);
        for motor in self.motors.get_mut().iter() {
            motor.stop.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityLoader;

    fn executor(params: &str) -> Arc<ActivityExecutor> {
        let def = ActivityDef::parse(params).unwrap();
        let activity = ActivityLoader::with_defaults().load(&def).unwrap();
        ActivityExecutor::new(def, activity, EngineConfig::default()).unwrap()
    }

    #[test]
    fn runs_to_finished() {
        let exec = executor("alias=e; driver=diag; op=noop; cycles=100; threads=3");
        assert_eq!(exec.state(), RunState::Created);
        exec.start().unwrap();
        assert!(exec.await_completion(Some(Duration::from_secs(10))).unwrap());
        assert_eq!(exec.state(), RunState::Finished);
        assert_eq!(exec.metrics().cycles(), 100);
        assert_eq!(exec.tally().count(RunState::Finished), 3);
        assert_eq!(exec.active_workers(), 0);
    }

    #[test]
    fn never_started_await_returns_false() {
        let exec = executor("alias=e; driver=diag; op=noop; cycles=1");
        assert!(!exec.await_completion(Some(Duration::from_millis(5))).unwrap());
        assert!(exec.stop());
    }

    #[test]
    fn restart_after_finish_rewinds() {
        let exec = executor("alias=e; driver=diag; op=noop; cycles=10");
        exec.start().unwrap();
        assert!(exec.await_completion(None).unwrap());
        exec.start().unwrap();
        assert!(exec.await_completion(None).unwrap());
        assert_eq!(exec.metrics().cycles(), 20);
    }

    #[test]
    fn unbounded_activity_stops_cooperatively() {
        let exec = executor("alias=e; driver=diag; op=noop; threads=2");
        exec.start().unwrap();
        assert!(!exec.await_completion(Some(Duration::from_millis(20))).unwrap());
        assert!(exec.stop());
        assert_eq!(exec.state(), RunState::Stopped);
        assert!(exec.await_completion(Some(Duration::ZERO)).unwrap());
        assert!(exec.stop());
    }

    #[test]
    fn errors_stop_policy_surfaces_failure() {
        let exec = executor("alias=e; driver=diag; diagfail=5; op=noop; cycles=1..100; errors=stop");
        exec.start().unwrap();
        let err = exec.await_completion(Some(Duration::from_secs(10))).unwrap_err();
        assert!(matches!(err, ActivityError::OpFailed { cycle: 5, .. }), "{err}");
        assert_eq!(exec.state(), RunState::Stopped);
        assert!(exec.failure().is_some());
    }

    #[test]
    fn count_policy_keeps_running() {
        let exec = executor("alias=e; driver=diag; diagfail=10; op=noop; cycles=100; threads=2");
        exec.start().unwrap();
        assert!(exec.await_completion(Some(Duration::from_secs(10))).unwrap());
        assert_eq!(exec.metrics().failures(), 10);
        assert_eq!(exec.metrics().successes(), 90);
    }
}
