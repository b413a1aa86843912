//! Live activity parameters
//!
//! # Critical Invariant
//!
//! A [`ParameterMap`] is shared by reference between the control thread and
//! every worker of an activity. Workers never copy it at start; they read
//! it while running, so `set`/`apply` are visible without a restart.
//! Every change bumps [`ParameterMap::version`] before listeners run.

use crate::error::ParamError;
use cb_templating::{ConfigSource, ParamsParser};
use cb_virtdata::Value;
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Notified after the parameter map changes
pub trait ParamListener: Send + Sync {
    /// Called once per `set` or `apply`, after the values are visible
    fn params_changed(&self, params: &ParameterMap);
}

/// A concurrently readable string map with a change counter
#[derive(Default)]
pub struct ParameterMap {
    values: DashMap<String, String>,
    version: AtomicU64,
    listeners: RwLock<Vec<Arc<dyn ParamListener>>>,
}

impl ParameterMap {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `name=value;name=value` text
    ///
    /// # Errors
    /// Returns [`ParamError::Syntax`] if the text is malformed.
    pub fn parse(text: &str) -> Result<Self, ParamError> {
        Ok(Self::from_pairs(ParamsParser::parse(text)?))
    }

    /// Build from name/value pairs
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let map = Self::new();
        for (k, v) in pairs {
            map.values.insert(k.into(), v.into());
        }
        map
    }

    /// Current value for `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).map(|v| v.value().clone())
    }

    /// Whether `name` is set
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Set one value and notify listeners
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        tracing::debug!(param = %name, value = %value, "parameter set");
        self.values.insert(name, value);
        self.changed();
    }

    /// Set several values and notify listeners once
    pub fn apply(&self, values: &IndexMap<String, String>) {
        for (k, v) in values {
            self.values.insert(k.clone(), v.clone());
        }
        tracing::debug!(count = values.len(), "parameters applied");
        self.changed();
    }

    /// Remove one value and notify listeners
    pub fn remove(&self, name: &str) -> Option<String> {
        let removed = self.values.remove(name).map(|(_, v)| v);
        if removed.is_some() {
            self.changed();
        }
        removed
    }

    /// Change counter, bumped by every `set`, `apply` or `remove`
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Names currently set, sorted
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Number of values
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no value is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy of every value, sorted by name
    #[must_use]
    pub fn snapshot(&self) -> IndexMap<String, String> {
        let mut snapshot: IndexMap<String, String> = self
            .values
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        snapshot.sort_keys();
        snapshot
    }

    /// Register a change listener
    pub fn add_listener(&self, listener: Arc<dyn ParamListener>) {
        self.listeners.write().push(listener);
    }

    /// Integer value
    ///
    /// # Errors
    /// Returns [`ParamError::Invalid`] if the value is not an integer.
    pub fn get_optional_i64(&self, name: &str) -> Result<Option<i64>, ParamError> {
        self.parse_as(name, "an integer")
    }

    /// Non-negative integer value
    ///
    /// # Errors
    /// Returns [`ParamError::Invalid`] if the value is not a non-negative integer.
    pub fn get_optional_usize(&self, name: &str) -> Result<Option<usize>, ParamError> {
        self.parse_as(name, "a non-negative integer")
    }

    /// Floating-point value
    ///
    /// # Errors
    /// Returns [`ParamError::Invalid`] if the value is not a number.
    pub fn get_optional_f64(&self, name: &str) -> Result<Option<f64>, ParamError> {
        self.parse_as(name, "a number")
    }

    /// Boolean value; accepts `true/false`, `yes/no` and `1/0`
    ///
    /// # Errors
    /// Returns [`ParamError::Invalid`] for any other text.
    pub fn get_optional_bool(&self, name: &str) -> Result<Option<bool>, ParamError> {
        let Some(raw) = self.get(name) else {
            return Ok(None);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Some(true)),
            "false" | "no" | "0" => Ok(Some(false)),
            _ => Err(ParamError::invalid(name, &raw, "a boolean")),
        }
    }

    /// Text value
    #[must_use]
    pub fn get_optional_string(&self, name: &str) -> Option<String> {
        self.get(name)
    }

    fn parse_as<T: FromStr>(&self, name: &str, expected: &'static str) -> Result<Option<T>, ParamError> {
        self.get(name)
            .map(|raw| {
                raw.trim()
                    .parse::<T>()
                    .map_err(|_| ParamError::invalid(name, &raw, expected))
            })
            .transpose()
    }

    fn changed(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.params_changed(self);
        }
    }
}

impl fmt::Debug for ParameterMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterMap")
            .field("values", &self.snapshot())
            .field("version", &self.version())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl fmt::Display for ParameterMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: Vec<String> = self
            .snapshot()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        f.write_str(&text.join(";"))
    }
}

impl ConfigSource for ParameterMap {
    fn source_name(&self) -> &str {
        "activity params"
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).map(Value::Text)
    }

    fn keys(&self) -> Vec<String> {
        ParameterMap::keys(self)
    }

    fn contains(&self, name: &str) -> bool {
        ParameterMap::contains(self, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counting(AtomicUsize);

    impl ParamListener for Counting {
        fn params_changed(&self, _params: &ParameterMap) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn parse_and_typed_reads() {
        let params = ParameterMap::parse("alias=reads; threads=4; rate=2.5; async=yes").unwrap();
        assert_eq!(params.get("alias").as_deref(), Some("reads"));
        assert_eq!(params.get_optional_usize("threads").unwrap(), Some(4));
        assert_eq!(params.get_optional_f64("rate").unwrap(), Some(2.5));
        assert_eq!(params.get_optional_bool("async").unwrap(), Some(true));
        assert_eq!(params.get_optional_i64("absent").unwrap(), None);
        assert!(params.get_optional_i64("alias").is_err());
        assert_eq!(params.to_string(), "alias=reads;async=yes;rate=2.5;threads=4");
    }

    #[test]
    fn changes_bump_version_and_notify() {
        let params = ParameterMap::from_pairs([("threads", "1")]);
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        params.add_listener(counter.clone());

        let before = params.version();
        params.set("threads", "2");
        params.apply(&IndexMap::from([
            ("threads".to_string(), "3".to_string()),
            ("cyclerate".to_string(), "10".to_string()),
        ]));
        assert_eq!(params.version(), before + 2);
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
        assert_eq!(params.get("threads").as_deref(), Some("3"));

        assert_eq!(params.remove("cyclerate").as_deref(), Some("10"));
        assert_eq!(params.remove("cyclerate"), None);
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn config_source_reads_live_values() {
        let params = Arc::new(ParameterMap::from_pairs([("limit", "5")]));
        let source: Arc<dyn ConfigSource> = params.clone();
        assert_eq!(source.source_name(), "activity params");
        assert_eq!(source.lookup("limit"), Some(Value::from("5")));
        params.set("limit", "6");
        assert_eq!(source.lookup("limit"), Some(Value::from("6")));
        assert!(source.contains("limit"));
        assert_eq!(source.keys(), vec!["limit".to_string()]);
    }

    #[test]
    fn syntax_errors_surface() {
        assert!(matches!(
            ParameterMap::parse("threads"),
            Err(ParamError::Syntax(_))
        ));
    }
}
