//! Error types for cb-engine
//!
//! - [`ActivityError`]: building, starting or running one activity
//! - [`ControlError`]: scenario control calls
//! - [`DriverError`]: a driver failing to execute an op
//! - [`ParamError`]: activity parameter values
//! - [`ConfigError`]: engine configuration files

use crate::run_state::RunState;
use cb_templating::{OpConfigError, ParamsError, TemplateError};

/// Failure of a single activity
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActivityError {
    /// An op template failed to resolve
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// An op field could not be read
    #[error("op config error: {0}")]
    OpConfig(#[from] OpConfigError),

    /// An activity parameter is invalid
    #[error("parameter error: {0}")]
    Param(#[from] ParamError),

    /// The driver could not be created or failed an op
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// The workload document could not be loaded
    #[error("workload '{name}': {message}")]
    Workload {
        /// Workload name or path
        name: String,
        /// What went wrong
        message: String,
    },

    /// Neither `workload` nor `op` was given
    #[error("activity '{alias}' has no workload; set workload=... or op=...")]
    NoWorkload {
        /// Activity alias
        alias: String,
    },

    /// Every op has a zero ratio
    #[error("activity '{alias}' has no ops to run")]
    EmptySequence {
        /// Activity alias
        alias: String,
    },

    /// Lifecycle transition not allowed
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition {
        /// Current state
        from: RunState,
        /// Requested state
        to: RunState,
    },

    /// A worker thread could not be started
    #[error("activity '{alias}': failed to spawn worker {slot}: {message}")]
    Spawn {
        /// Activity alias
        alias: String,
        /// Worker slot
        slot: usize,
        /// OS error text
        message: String,
    },

    /// A worker panicked
    #[error("activity '{alias}': worker {slot} panicked: {message}")]
    WorkerPanic {
        /// Activity alias
        alias: String,
        /// Worker slot
        slot: usize,
        /// Panic payload text
        message: String,
    },

    /// An op failed under the `stop` error policy
    #[error("activity '{alias}': op '{op}' failed at cycle {cycle}: {message}")]
    OpFailed {
        /// Activity alias
        alias: String,
        /// Op name
        op: String,
        /// Failing cycle
        cycle: i64,
        /// Failure text
        message: String,
    },
}

impl ActivityError {
    /// Whether the error was raised before any worker ran
    #[inline]
    #[must_use]
    pub fn is_compile_time(&self) -> bool {
        matches!(
            self,
            Self::Template(_)
                | Self::OpConfig(_)
                | Self::Param(_)
                | Self::Driver(DriverError::Config { .. } | DriverError::Unknown { .. })
                | Self::Workload { .. }
                | Self::NoWorkload { .. }
                | Self::EmptySequence { .. }
        )
    }

    /// Whether a worker failed while running
    #[inline]
    #[must_use]
    pub fn is_worker_failure(&self) -> bool {
        matches!(self, Self::WorkerPanic { .. } | Self::OpFailed { .. })
    }

    /// Create a workload error
    #[must_use]
    pub fn workload(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Workload {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Failure of a scenario control call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlError {
    /// No activity has this alias
    #[error("no activity named '{alias}'")]
    UnknownAlias {
        /// Requested alias
        alias: String,
    },

    /// A pattern matched no activity
    #[error("no activity matches '{pattern}'")]
    NoMatch {
        /// Pattern as given
        pattern: String,
    },

    /// A pattern element is not a valid regular expression
    #[error("invalid alias pattern '{pattern}': {message}")]
    InvalidPattern {
        /// Offending element
        pattern: String,
        /// Regex error text
        message: String,
    },

    /// A parameter map has no `alias`
    #[error("activity parameters must include an alias")]
    MissingAlias,

    /// The activity is already running
    #[error("activity '{alias}' is already running")]
    AlreadyRunning {
        /// Activity alias
        alias: String,
    },

    /// A parameter value was rejected
    #[error(transparent)]
    Param(#[from] ParamError),

    /// The activity failed
    #[error(transparent)]
    Activity(#[from] ActivityError),
}

impl ControlError {
    /// Whether the error names an unknown activity
    #[inline]
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::UnknownAlias { .. } | Self::NoMatch { .. })
    }
}

/// Failure reported by a driver
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// The op failed and may succeed if tried again
    #[error("op '{op}' failed at cycle {cycle} (retryable): {message}")]
    Retryable {
        /// Op name
        op: String,
        /// Cycle
        cycle: i64,
        /// Failure text
        message: String,
    },

    /// The op failed
    #[error("op '{op}' failed at cycle {cycle}: {message}")]
    Failed {
        /// Op name
        op: String,
        /// Cycle
        cycle: i64,
        /// Failure text
        message: String,
    },

    /// The worker was interrupted mid-op
    #[error("op '{op}' interrupted at cycle {cycle}")]
    Interrupted {
        /// Op name
        op: String,
        /// Cycle
        cycle: i64,
    },

    /// The driver could not be created
    #[error("driver '{driver}': {message}")]
    Config {
        /// Driver name
        driver: String,
        /// What went wrong
        message: String,
    },

    /// No driver has this name
    #[error("unknown driver '{name}'; known drivers: {known}")]
    Unknown {
        /// Requested name
        name: String,
        /// Registered names
        known: String,
    },
}

impl DriverError {
    /// Create a non-retryable op failure
    #[must_use]
    pub fn failed(op: &str, cycle: i64, message: impl Into<String>) -> Self {
        Self::Failed {
            op: op.to_string(),
            cycle,
            message: message.into(),
        }
    }

    /// Create a retryable op failure
    #[must_use]
    pub fn retryable(op: &str, cycle: i64, message: impl Into<String>) -> Self {
        Self::Retryable {
            op: op.to_string(),
            cycle,
            message: message.into(),
        }
    }

    /// Whether the op may be tried again
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

/// Invalid activity parameter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    /// Value does not parse as the expected type
    #[error("parameter '{name}' has invalid value '{value}': expected {expected}")]
    Invalid {
        /// Parameter name
        name: String,
        /// Offending value
        value: String,
        /// Accepted form
        expected: &'static str,
    },

    /// No activity or driver reads this parameter
    #[error("unknown parameter '{name}'; known parameters: {known}")]
    Unknown {
        /// Parameter name
        name: String,
        /// Names accepted for the activity
        known: String,
    },

    /// Parameter text is malformed
    #[error(transparent)]
    Syntax(#[from] ParamsError),
}

impl ParamError {
    /// Create an invalid-value error
    #[must_use]
    pub fn invalid(name: &str, value: &str, expected: &'static str) -> Self {
        Self::Invalid {
            name: name.to_string(),
            value: value.to_string(),
            expected,
        }
    }

    /// Create an unknown-name error
    #[must_use]
    pub fn unknown(name: &str, known: &[String]) -> Self {
        Self::Unknown {
            name: name.to_string(),
            known: known.join(", "),
        }
    }
}

/// Engine configuration could not be loaded
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("cannot read config '{path}': {source}")]
    Io {
        /// File path
        path: String,
        /// OS error
        source: std::io::Error,
    },

    /// The document is not valid TOML for the config schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
