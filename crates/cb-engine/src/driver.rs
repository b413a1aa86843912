//! Driver boundary
//!
//! A [`Driver`] executes one materialized op against a target system.
//! The engine treats the call as opaque: it only sees success, a
//! [`DriverError`] and the time it took.
//!
//! # Critical Invariant
//!
//! Drivers are shared by every worker of an activity. Per-worker state
//! lives in the [`WorkerContext`] passed to each call, never in thread
//! locals.

use crate::activity_def::ActivityDef;
use crate::error::DriverError;
use cb_virtdata::Value;
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One op with its fields resolved for one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedOp {
    name: String,
    cycle: i64,
    fields: IndexMap<String, Value>,
}

impl ResolvedOp {
    /// Create a resolved op
    #[must_use]
    pub fn new(name: impl Into<String>, cycle: i64, fields: IndexMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            cycle,
            fields,
        }
    }

    /// Op name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cycle the fields were resolved for
    #[inline]
    #[must_use]
    pub fn cycle(&self) -> i64 {
        self.cycle
    }

    /// Resolved fields
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &IndexMap<String, Value> {
        &self.fields
    }

    /// One resolved field
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Reuse this op for another cycle, keeping the field allocation
    pub(crate) fn reset(&mut self, name: &str, cycle: i64) -> &mut IndexMap<String, Value> {
        if self.name != name {
            self.name.clear();
            self.name.push_str(name);
        }
        self.cycle = cycle;
        &mut self.fields
    }
}

/// Per-worker state handed to every driver call
#[derive(Debug)]
pub struct WorkerContext {
    alias: String,
    slot: usize,
    scratch: String,
    interrupt: Arc<AtomicBool>,
}

impl WorkerContext {
    /// Context for worker `slot` of `alias`
    #[must_use]
    pub fn new(alias: impl Into<String>, slot: usize, interrupt: Arc<AtomicBool>) -> Self {
        Self {
            alias: alias.into(),
            slot,
            scratch: String::with_capacity(256),
            interrupt,
        }
    }

    /// Worker slot index
    #[inline]
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Owning activity alias
    #[inline]
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Cleared scratch buffer owned by this worker
    pub fn scratch(&mut self) -> &mut String {
        self.scratch.clear();
        &mut self.scratch
    }

    /// Whether the worker was interrupted by a forced stop
    ///
    /// Long-running drivers should poll this and return
    /// [`DriverError::Interrupted`].
    #[inline]
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }
}

/// What a driver returns for a successful op
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpResult {
    /// Optional value produced by the op
    pub value: Option<Value>,
}

impl OpResult {
    /// Success without a value
    #[inline]
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// Success with a value
    #[inline]
    #[must_use]
    pub fn with_value(value: impl Into<Value>) -> Self {
        Self {
            value: Some(value.into()),
        }
    }
}

/// Executes resolved ops against a target system
pub trait Driver: Send + Sync {
    /// Driver name
    fn name(&self) -> &str;

    /// Activity parameters the driver reads, besides the core ones
    fn config_names(&self) -> &[&'static str] {
        &[]
    }

    /// Execute one op
    ///
    /// # Errors
    /// Returns [`DriverError::Retryable`] for failures worth retrying,
    /// [`DriverError::Failed`] otherwise.
    fn execute(&self, op: &ResolvedOp, ctx: &mut WorkerContext) -> Result<OpResult, DriverError>;
}

/// Creates a driver for one activity
pub type DriverFactory = Arc<dyn Fn(&ActivityDef) -> Result<Arc<dyn Driver>, DriverError> + Send + Sync>;

/// Named driver factories
pub struct DriverRegistry {
    factories: DashMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    /// Registry with the `stdout` and `diag` drivers
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register("stdout", |_def| Ok(Arc::new(StdoutDriver::stdout()) as Arc<dyn Driver>));
        registry.register("diag", |def| Ok(Arc::new(DiagDriver::from_def(def)?) as Arc<dyn Driver>));
        registry
    }

    /// Register a factory, replacing any with the same name
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ActivityDef) -> Result<Arc<dyn Driver>, DriverError> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(driver = %name, "driver registered");
        self.factories.insert(name, Arc::new(factory));
    }

    /// Register one shared instance for every activity
    pub fn register_instance(&self, driver: Arc<dyn Driver>) {
        let name = driver.name().to_string();
        self.register(name, move |_def| Ok(Arc::clone(&driver)));
    }

    /// Create the driver named by `def`
    ///
    /// # Errors
    /// Returns [`DriverError::Unknown`] if no factory has that name, or the
    /// factory's own error.
    pub fn create(&self, def: &ActivityDef) -> Result<Arc<dyn Driver>, DriverError> {
        let name = def.driver();
        let factory = self
            .factories
            .get(&name)
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| DriverError::Unknown {
                name: name.clone(),
                known: self.names().join(", "),
            })?;
        factory(def)
    }

    /// Registered names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}

/// Writes each op as one line
///
/// The `stmt` field is written as is when present; otherwise the fields
/// are written as a JSON object.
pub struct StdoutDriver {
    out: Mutex<Box<dyn Write + Send>>,
}

impl StdoutDriver {
    /// Driver writing to standard output
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Driver writing to `out`
    #[must_use]
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out: Mutex::new(out) }
    }
}

impl Driver for StdoutDriver {
    fn name(&self) -> &str {
        "stdout"
    }

    fn execute(&self, op: &ResolvedOp, ctx: &mut WorkerContext) -> Result<OpResult, DriverError> {
        let line = ctx.scratch();
        match op.field("stmt") {
            Some(stmt) => {
                use std::fmt::Write as _;
                let _ = write!(line, "{stmt}");
            }
            None => {
                let json = serde_json::to_string(op.fields())
                    .map_err(|e| DriverError::failed(op.name(), op.cycle(), e.to_string()))?;
                line.push_str(&json);
            }
        }
        let mut out = self.out.lock();
        writeln!(out, "{line}").map_err(|e| DriverError::failed(op.name(), op.cycle(), e.to_string()))?;
        Ok(OpResult::ok())
    }
}

/// Does nothing, optionally failing every `diagfail`-th cycle
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagDriver {
    fail_modulo: Option<i64>,
}

impl DiagDriver {
    /// Driver that fails cycles divisible by `n`; `0` never fails
    #[must_use]
    pub fn new(fail_modulo: i64) -> Self {
        Self {
            fail_modulo: (fail_modulo > 0).then_some(fail_modulo),
        }
    }

    /// Driver configured from the `diagfail` param
    ///
    /// # Errors
    /// Returns [`DriverError::Config`] if `diagfail` is not an integer.
    pub fn from_def(def: &ActivityDef) -> Result<Self, DriverError> {
        let modulo = def
            .params()
            .get_optional_i64("diagfail")
            .map_err(|e| DriverError::Config {
                driver: "diag".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self::new(modulo.unwrap_or(0)))
    }
}

impl Driver for DiagDriver {
    fn name(&self) -> &str {
        "diag"
    }

    fn config_names(&self) -> &[&'static str] {
        &["diagfail"]
    }

    fn execute(&self, op: &ResolvedOp, _ctx: &mut WorkerContext) -> Result<OpResult, DriverError> {
        match self.fail_modulo {
            Some(n) if op.cycle().rem_euclid(n) == 0 => {
                Err(DriverError::failed(op.name(), op.cycle(), format!("diagfail={n}")))
            }
            _ => Ok(OpResult::ok()),
        }
    }
}
