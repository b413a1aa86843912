//! Configuration tiers consulted after the op payload

use cb_virtdata::Value;
use indexmap::IndexMap;
use std::collections::HashMap;

/// A read-only source of configuration values
///
/// Implementations may be updated concurrently by their owner; every
/// lookup sees the latest value.
pub trait ConfigSource: Send + Sync {
    /// Name used in diagnostics, such as `activity params`
    fn source_name(&self) -> &str;

    /// Current value for `name`
    fn lookup(&self, name: &str) -> Option<Value>;

    /// Names currently defined
    fn keys(&self) -> Vec<String>;

    /// Whether `name` is defined
    fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }
}

impl ConfigSource for IndexMap<String, Value> {
    fn source_name(&self) -> &str {
        "map"
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }

    fn contains(&self, name: &str) -> bool {
        self.contains_key(name)
    }
}

impl ConfigSource for HashMap<String, Value> {
    fn source_name(&self) -> &str {
        "map"
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn contains(&self, name: &str) -> bool {
        self.contains_key(name)
    }
}

impl ConfigSource for HashMap<String, String> {
    fn source_name(&self) -> &str {
        "map"
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).map(|v| Value::Text(v.clone()))
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys().cloned().collect();
        keys.sort();
        keys
    }
}
