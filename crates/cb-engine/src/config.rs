//! Engine configuration
//!
//! Loaded from TOML; every field has a default, so an empty document is a
//! valid configuration.
//!
//! ```toml
//! stop_grace_ms = 2000
//! stride = 10
//! error_policy = "warn"
//! ```

use crate::activity_def::{ErrorPolicy, DEFAULT_MAX_TRIES};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long `stop` waits for workers, in milliseconds
    pub stop_grace_ms: u64,
    /// Default grace before `force_stop` interrupts workers, in milliseconds
    pub force_stop_grace_ms: u64,
    /// Cycles claimed per cursor access when an activity sets no `stride`
    pub stride: usize,
    /// Compiled binding cache capacity
    pub binding_cache_capacity: u64,
    /// Error policy when an activity sets no `errors`
    pub error_policy: ErrorPolicy,
    /// Attempts per cycle when an activity sets no `maxtries`
    pub max_tries: u32,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML text
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] if the text is not valid TOML for this schema.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// With stop grace
    #[inline]
    #[must_use]
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace_ms = duration_ms(grace);
        self
    }

    /// With force-stop grace
    #[inline]
    #[must_use]
    pub fn with_force_stop_grace(mut self, grace: Duration) -> Self {
        self.force_stop_grace_ms = duration_ms(grace);
        self
    }

    /// With default stride
    #[inline]
    #[must_use]
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride.max(1);
        self
    }

    /// With binding cache capacity
    #[inline]
    #[must_use]
    pub fn with_binding_cache_capacity(mut self, capacity: u64) -> Self {
        self.binding_cache_capacity = capacity;
        self
    }

    /// With default error policy
    #[inline]
    #[must_use]
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// With default attempts per cycle
    #[inline]
    #[must_use]
    pub fn with_max_tries(mut self, tries: u32) -> Self {
        self.max_tries = tries.max(1);
        self
    }

    /// Stop grace as a duration
    #[inline]
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Force-stop grace as a duration
    #[inline]
    #[must_use]
    pub fn force_stop_grace(&self) -> Duration {
        Duration::from_millis(self.force_stop_grace_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stop_grace_ms: 5_000,
            force_stop_grace_ms: 1_000,
            stride: 1,
            binding_cache_capacity: 1_024,
            error_policy: ErrorPolicy::Count,
            max_tries: DEFAULT_MAX_TRIES,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = EngineConfig::from_toml_str("stop_grace_ms = 250\nerror_policy = \"stop\"\n").unwrap();
        assert_eq!(config.stop_grace(), Duration::from_millis(250));
        assert_eq!(config.error_policy, ErrorPolicy::Stop);
        assert_eq!(config.stride, 1);
        assert_eq!(config.max_tries, 10);
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(matches!(
            EngineConfig::from_toml_str("error_policy = \"ignore\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn builders() {
        let config = EngineConfig::new()
            .with_stride(0)
            .with_max_tries(3)
            .with_force_stop_grace(Duration::from_secs(2));
        assert_eq!(config.stride, 1);
        assert_eq!(config.max_tries, 3);
        assert_eq!(config.force_stop_grace_ms, 2_000);
    }
}
