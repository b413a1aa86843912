//! Activity execution and scenario control for cyclebench
//!
//! An activity runs a workload's ops over a range of cycles on a pool of
//! OS threads:
//! - [`ActivityDef`] / [`ParameterMap`]: live, shared activity parameters
//! - [`ActivityLoader`]: workload + bindings + driver into an [`Activity`]
//! - [`ActivityExecutor`]: worker pool and lifecycle ([`RunState`])
//! - [`ScenarioController`]: alias registry and control calls
//! - [`Driver`]: the boundary to the system under test
//!
//! # Example
//!
//! ```rust,ignore
//! use cb_engine::prelude::*;
//!
//! let controller = ScenarioController::new(EngineConfig::default());
//! let def = ActivityDef::parse("alias=demo; driver=stdout; op='id={{Mod(10)}}'; cycles=10")?;
//! assert!(controller.run(def, None)?);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod activity;
pub mod activity_def;
pub mod config;
pub mod controller;
pub mod cursor;
pub mod cycles;
pub mod driver;
pub mod error;
pub mod executor;
pub mod metrics;
mod motor;
pub mod params;
pub mod rate;
pub mod run_state;
pub mod sequence;
pub mod workload;

pub use crate::activity::{Activity, ActivityLoader};
pub use crate::activity_def::{ActivityDef, ErrorPolicy};
pub use crate::config::EngineConfig;
pub use crate::controller::ScenarioController;
pub use crate::cursor::CycleCursor;
pub use crate::cycles::CycleRange;
pub use crate::driver::{DiagDriver, Driver, DriverRegistry, OpResult, ResolvedOp, StdoutDriver, WorkerContext};
pub use crate::error::{ActivityError, ConfigError, ControlError, DriverError, ParamError};
pub use crate::executor::ActivityExecutor;
pub use crate::metrics::{ActivityMetrics, CycleObserver, CycleOutcome, MetricsSummary};
pub use crate::params::{ParamListener, ParameterMap};
pub use crate::rate::CycleRateLimiter;
pub use crate::run_state::{allowed_transitions, validate_transition, RunState, RunStateTally};
pub use crate::sequence::OpSequence;
pub use crate::workload::Workload;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ActivityDef, ActivityError, ActivityExecutor, ControlError, Driver, DriverError, EngineConfig,
        OpResult, ResolvedOp, RunState, ScenarioController, WorkerContext, Workload,
    };
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
