//! Testing utilities for the cyclebench workspace
//!
//! Shared drivers and fixtures for engine integration tests.

#![allow(missing_docs)]

use cb_engine::{
    ActivityDef, ActivityLoader, Driver, DriverError, DriverRegistry, EngineConfig, OpResult,
    ResolvedOp, ScenarioController, WorkerContext,
};
use cb_virtdata::{BindingCompiler, Value};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub slot: usize,
    pub op: String,
    pub cycle: i64,
    pub fields: Vec<(String, Value)>,
}

/// Records every op it is handed
#[derive(Debug, Default)]
pub struct RecordingDriver {
    dispatched: Mutex<Vec<Dispatch>>,
}

impl RecordingDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn dispatched(&self) -> Vec<Dispatch> {
        self.dispatched.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.dispatched.lock().len()
    }

    /// Dispatched cycles, sorted
    pub fn cycles(&self) -> Vec<i64> {
        let mut cycles: Vec<i64> = self.dispatched.lock().iter().map(|d| d.cycle).collect();
        cycles.sort_unstable();
        cycles
    }

    pub fn slots(&self) -> HashSet<usize> {
        self.dispatched.lock().iter().map(|d| d.slot).collect()
    }

    pub fn field(&self, cycle: i64, name: &str) -> Option<Value> {
        self.dispatched
            .lock()
            .iter()
            .find(|d| d.cycle == cycle)
            .and_then(|d| d.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone()))
    }
}

impl Driver for RecordingDriver {
    fn name(&self) -> &str {
        "recording"
    }

    fn execute(&self, op: &ResolvedOp, ctx: &mut WorkerContext) -> Result<OpResult, DriverError> {
        self.dispatched.lock().push(Dispatch {
            slot: ctx.slot(),
            op: op.name().to_string(),
            cycle: op.cycle(),
            fields: op.fields().iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        });
        Ok(OpResult::ok())
    }
}

/// Fails chosen cycles, optionally as retryable for the first few attempts
#[derive(Debug)]
pub struct FailingDriver {
    cycles: HashSet<i64>,
    retryable_attempts: u32,
    attempts: AtomicU32,
}

impl FailingDriver {
    /// Fail `cycles` on every attempt
    pub fn on_cycles(cycles: impl IntoIterator<Item = i64>) -> Arc<Self> {
        Arc::new(Self {
            cycles: cycles.into_iter().collect(),
            retryable_attempts: 0,
            attempts: AtomicU32::new(0),
        })
    }

    /// Fail `cycles` with a retryable error `attempts` times, then succeed
    pub fn retryable(cycles: impl IntoIterator<Item = i64>, attempts: u32) -> Arc<Self> {
        Arc::new(Self {
            cycles: cycles.into_iter().collect(),
            retryable_attempts: attempts,
            attempts: AtomicU32::new(0),
        })
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Driver for FailingDriver {
    fn name(&self) -> &str {
        "failing"
    }

    fn execute(&self, op: &ResolvedOp, _ctx: &mut WorkerContext) -> Result<OpResult, DriverError> {
        if !self.cycles.contains(&op.cycle()) {
            return Ok(OpResult::ok());
        }
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.retryable_attempts == 0 {
            Err(DriverError::failed(op.name(), op.cycle(), "injected failure"))
        } else if attempt <= self.retryable_attempts {
            Err(DriverError::retryable(op.name(), op.cycle(), "injected transient failure"))
        } else {
            Ok(OpResult::ok())
        }
    }
}

/// Panics on one cycle
#[derive(Debug)]
pub struct PanickingDriver {
    cycle: i64,
}

impl PanickingDriver {
    pub fn on_cycle(cycle: i64) -> Arc<Self> {
        Arc::new(Self { cycle })
    }
}

impl Driver for PanickingDriver {
    fn name(&self) -> &str {
        "panicking"
    }

    fn execute(&self, op: &ResolvedOp, _ctx: &mut WorkerContext) -> Result<OpResult, DriverError> {
        if op.cycle() == self.cycle {
            panic!("injected panic at cycle {}", op.cycle());
        }
        Ok(OpResult::ok())
    }
}

/// Sleeps per op, returning early when the worker is interrupted
#[derive(Debug)]
pub struct SlowDriver {
    delay: Duration,
}

impl SlowDriver {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self { delay })
    }
}

impl Driver for SlowDriver {
    fn name(&self) -> &str {
        "slow"
    }

    fn execute(&self, op: &ResolvedOp, ctx: &mut WorkerContext) -> Result<OpResult, DriverError> {
        let until = Instant::now() + self.delay;
        while Instant::now() < until {
            if ctx.is_interrupted() {
                return Err(DriverError::Interrupted {
                    op: op.name().to_string(),
                    cycle: op.cycle(),
                });
            }
            std::thread::sleep(Duration::from_millis(5).min(self.delay));
        }
        Ok(OpResult::ok())
    }
}

/// Config with short grace periods
pub fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_stop_grace(Duration::from_secs(5))
        .with_force_stop_grace(Duration::from_millis(100))
}

/// Controller whose registry also holds `driver` under its own name
pub fn controller_with(driver: Arc<dyn Driver>) -> ScenarioController {
    controller_with_config(driver, fast_config())
}

pub fn controller_with_config(driver: Arc<dyn Driver>, config: EngineConfig) -> ScenarioController {
    let drivers = DriverRegistry::with_defaults();
    drivers.register_instance(driver);
    let loader = ActivityLoader::new(Arc::new(BindingCompiler::default()), Arc::new(drivers));
    ScenarioController::with_loader(config, loader)
}

pub fn def(params: &str) -> ActivityDef {
    ActivityDef::parse(params).unwrap()
}

/// A workload file in a temporary directory, removed when dropped
pub struct WorkloadFile {
    pub dir: TempDir,
    pub path: PathBuf,
}

pub fn workload_file(name: &str, yaml: &str) -> WorkloadFile {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(format!("{name}.yaml"));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    WorkloadFile { dir, path }
}
