//! Activity definitions
//!
//! An [`ActivityDef`] is a typed view over a shared [`ParameterMap`].
//! Cloning a def shares the map, so a value changed through one clone is
//! seen by every other clone and by the running workers.
//!
//! # Example
//!
//! ```rust,ignore
//! let def = ActivityDef::parse("alias=writes; driver=diag; cycles=10K; threads=auto")?;
//! assert_eq!(def.alias(), "writes");
//! ```

use crate::cycles::CycleRange;
use crate::error::ParamError;
use crate::params::ParameterMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Alias used when none is given
pub const DEFAULT_ALIAS: &str = "UNNAMEDACTIVITY";

/// Driver used when none is given
pub const DEFAULT_DRIVER: &str = "stdout";

/// Attempts per cycle when `maxtries` is not given
pub const DEFAULT_MAX_TRIES: u32 = 10;

/// Parameters read by the engine itself
pub const CORE_PARAMS: &[&str] = &[
    "alias", "driver", "type", "workload", "op", "cycles", "threads", "cyclerate", "errors", "maxtries", "stride",
];

/// What to do with a cycle that failed after all retries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Count the failure
    #[default]
    Count,
    /// Count the failure and log it
    Warn,
    /// Stop the activity with the failure attached
    Stop,
}

impl FromStr for ErrorPolicy {
    type Err = ParamError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text.trim().to_ascii_lowercase().as_str() {
            "count" => Ok(Self::Count),
            "warn" => Ok(Self::Warn),
            "stop" => Ok(Self::Stop),
            _ => Err(ParamError::invalid("errors", text, "one of count, warn, stop")),
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Count => "count",
            Self::Warn => "warn",
            Self::Stop => "stop",
        })
    }
}

/// Parameters of one activity
#[derive(Debug, Clone)]
pub struct ActivityDef {
    params: Arc<ParameterMap>,
}

impl ActivityDef {
    /// Parse `name=value;name=value` text
    ///
    /// # Errors
    /// Returns [`ParamError`] if the text is malformed.
    pub fn parse(text: &str) -> Result<Self, ParamError> {
        Ok(Self::from_map(ParameterMap::parse(text)?))
    }

    /// Wrap an existing map
    #[must_use]
    pub fn from_map(params: ParameterMap) -> Self {
        Self {
            params: Arc::new(params),
        }
    }

    /// Shared parameter map
    #[inline]
    #[must_use]
    pub fn params(&self) -> &Arc<ParameterMap> {
        &self.params
    }

    /// Activity alias
    #[must_use]
    pub fn alias(&self) -> String {
        self.params
            .get("alias")
            .unwrap_or_else(|| DEFAULT_ALIAS.to_string())
    }

    /// Whether `alias` was given explicitly
    #[must_use]
    pub fn has_alias(&self) -> bool {
        self.params.contains("alias")
    }

    /// Driver name; `type` is accepted as a synonym of `driver`
    #[must_use]
    pub fn driver(&self) -> String {
        self.params
            .get("driver")
            .or_else(|| self.params.get("type"))
            .unwrap_or_else(|| DEFAULT_DRIVER.to_string())
    }

    /// Cycle range; unbounded from 0 when `cycles` is not set
    ///
    /// # Errors
    /// Returns [`ParamError`] if `cycles` does not parse.
    pub fn cycles(&self) -> Result<CycleRange, ParamError> {
        self.params
            .get("cycles")
            .map_or_else(|| Ok(CycleRange::default()), |raw| raw.parse())
    }

    /// Worker count; `auto` means the available parallelism
    ///
    /// # Errors
    /// Returns [`ParamError`] if `threads` is not a positive integer or `auto`.
    pub fn threads(&self) -> Result<usize, ParamError> {
        let Some(raw) = self.params.get("threads") else {
            return Ok(1);
        };
        if raw.trim().eq_ignore_ascii_case("auto") {
            return Ok(std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get));
        }
        match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ParamError::invalid("threads", &raw, "a positive integer or 'auto'")),
        }
    }

    /// Target cycles per second; `None` or `0` means unlimited
    ///
    /// # Errors
    /// Returns [`ParamError`] if `cyclerate` is not a non-negative number.
    pub fn cyclerate(&self) -> Result<Option<f64>, ParamError> {
        match self.params.get_optional_f64("cyclerate")? {
            Some(rate) if !rate.is_finite() || rate < 0.0 => Err(ParamError::invalid(
                "cyclerate",
                &rate.to_string(),
                "a non-negative number",
            )),
            Some(rate) if rate == 0.0 => Ok(None),
            other => Ok(other),
        }
    }

    /// Error policy, `count` by default
    ///
    /// # Errors
    /// Returns [`ParamError`] if `errors` is not a known policy.
    pub fn error_policy(&self) -> Result<Option<ErrorPolicy>, ParamError> {
        self.params.get("errors").map(|raw| raw.parse()).transpose()
    }

    /// Attempts per cycle for retryable failures
    ///
    /// # Errors
    /// Returns [`ParamError`] if `maxtries` is not a positive integer.
    pub fn max_tries(&self) -> Result<Option<u32>, ParamError> {
        let Some(raw) = self.params.get("maxtries") else {
            return Ok(None);
        };
        match raw.trim().parse::<u32>() {
            Ok(n) if n > 0 => Ok(Some(n)),
            _ => Err(ParamError::invalid("maxtries", &raw, "a positive integer")),
        }
    }

    /// Cycles claimed per cursor access
    ///
    /// # Errors
    /// Returns [`ParamError`] if `stride` is not a positive integer.
    pub fn stride(&self) -> Result<Option<usize>, ParamError> {
        match self.params.get_optional_usize("stride")? {
            Some(0) => Err(ParamError::invalid("stride", "0", "a positive integer")),
            other => Ok(other),
        }
    }

    /// Named workload
    #[must_use]
    pub fn workload(&self) -> Option<String> {
        self.params.get("workload")
    }

    /// Inline op statement
    #[must_use]
    pub fn op(&self) -> Option<String> {
        self.params.get("op")
    }

    /// Check every typed parameter
    ///
    /// # Errors
    /// Returns the first [`ParamError`] found.
    pub fn validate(&self) -> Result<(), ParamError> {
        self.cycles()?;
        self.threads()?;
        self.cyclerate()?;
        self.error_policy()?;
        self.max_tries()?;
        self.stride()?;
        Ok(())
    }

    /// Whether any of the loading params differ from `other`
    ///
    /// A change to the driver, the workload, the inline op or a
    /// driver-specific name in `driver_params` needs the activity rebuilt.
    #[must_use]
    pub fn needs_reload(&self, other: &Self, driver_params: &[&str]) -> bool {
        self.driver() != other.driver()
            || self.workload() != other.workload()
            || self.op() != other.op()
            || driver_params
                .iter()
                .any(|name| self.params.get(name) != other.params.get(name))
    }
}

impl fmt::Display for ActivityDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let def = ActivityDef::parse("").unwrap();
        assert_eq!(def.alias(), DEFAULT_ALIAS);
        assert!(!def.has_alias());
        assert_eq!(def.driver(), "stdout");
        assert_eq!(def.cycles().unwrap(), CycleRange::unbounded(0));
        assert_eq!(def.threads().unwrap(), 1);
        assert_eq!(def.cyclerate().unwrap(), None);
        assert_eq!(def.error_policy().unwrap(), None);
        assert_eq!(def.max_tries().unwrap(), None);
    }

    #[test]
    fn typed_values() {
        let def = ActivityDef::parse(
            "alias=a; type=diag; cycles=5..10; threads=auto; cyclerate=0; errors=WARN; maxtries=3",
        )
        .unwrap();
        assert_eq!(def.driver(), "diag");
        assert_eq!(def.cycles().unwrap().len(), Some(5));
        assert!(def.threads().unwrap() >= 1);
        assert_eq!(def.cyclerate().unwrap(), None);
        assert_eq!(def.error_policy().unwrap(), Some(ErrorPolicy::Warn));
        assert_eq!(def.max_tries().unwrap(), Some(3));
        assert!(def.validate().is_ok());
    }

    #[test]
    fn invalid_values_are_rejected() {
        for text in ["threads=0", "threads=x", "errors=ignore", "maxtries=0", "cyclerate=-1", "stride=0", "cycles=9..1"] {
            let def = ActivityDef::parse(text).unwrap();
            assert!(def.validate().is_err(), "{text}");
        }
    }

    #[test]
    fn clones_share_params() {
        let def = ActivityDef::parse("alias=a; threads=1").unwrap();
        let other = def.clone();
        def.params().set("threads", "3");
        assert_eq!(other.threads().unwrap(), 3);
    }

    #[test]
    fn loading_params_decide_reload() {
        let def = ActivityDef::parse("alias=a; driver=diag; op=x; threads=1; diagfail=0").unwrap();
        let same = ActivityDef::parse("alias=a; driver=diag; op=x; threads=4; diagfail=0").unwrap();
        assert!(!def.needs_reload(&same, &["diagfail"]));

        let new_op = ActivityDef::parse("alias=a; driver=diag; op=y; diagfail=0").unwrap();
        assert!(def.needs_reload(&new_op, &[]));
        let new_fail = ActivityDef::parse("alias=a; driver=diag; op=x; diagfail=2").unwrap();
        assert!(def.needs_reload(&new_fail, &["diagfail"]));
        assert!(!def.needs_reload(&new_fail, &[]));
    }
}
