//! Op template resolution
//!
//! A [`RawOpTemplate`] is an op as declared in a workload. Resolving it
//! produces a [`ParsedTemplateMap`], which classifies every payload field
//! and answers field lookups for any cycle.
//!
//! Lookups consult three tiers in order:
//! 1. op payload fields, static or dynamic
//! 2. op params
//! 3. activity params, read live through a [`ConfigSource`]
//!
//! # Critical Invariant
//!
//! A name is visible as exactly one of static or dynamic at the payload
//! tier. The config tiers are consulted only when the payload has no entry
//! for the name, and they only ever yield static values.
//!
//! # Example
//!
//! ```rust,ignore
//! let raw = RawOpTemplate::new("write")
//!     .with_field("stmt", "insert into t values ({id})")
//!     .with_binding("id", "Identity()")
//!     .with_param("consistency", "ONE");
//! let map = ParsedTemplateMap::resolve(&raw, None, &compiler)?;
//! assert_eq!(map.get("stmt", 7)?, Value::from("insert into t values (7)"));
//! ```

use crate::bind_points::CapturePoint;
use crate::config_source::ConfigSource;
use crate::error::{OpConfigError, TemplateError};
use crate::field::{holds_bind_point, DynamicField, FieldParser, FieldTemplate};
use cb_virtdata::{BindingCompiler, FromValue, Value};
use indexmap::IndexMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

const OP_PARAMS: &str = "op params";

/// A per-cycle accessor produced by [`ParsedTemplateMap::get_as_function`]
pub type CycleFn<T> = Arc<dyn Fn(i64) -> Result<T, OpConfigError> + Send + Sync>;

/// An op as declared, before any field is classified
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawOpTemplate {
    /// Op name, unique within a workload
    pub name: String,
    /// Payload fields
    pub op: IndexMap<String, Value>,
    /// Op-level params
    pub params: IndexMap<String, Value>,
    /// Anchor to recipe declarations
    pub bindings: IndexMap<String, String>,
    /// Free-form labels
    pub tags: IndexMap<String, String>,
    /// Relative frequency within an op sequence
    pub ratio: u32,
}

impl RawOpTemplate {
    /// Create an empty op template
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ratio: 1,
            ..Self::default()
        }
    }

    /// Create an op whose only payload field is `stmt`
    #[must_use]
    pub fn from_statement(name: impl Into<String>, stmt: impl Into<String>) -> Self {
        Self::new(name).with_field("stmt", Value::Text(stmt.into()))
    }

    /// Split a flat field map into payload and metadata
    ///
    /// `name`, `bindings`, `tags` and `ratio` are always metadata and
    /// `params` is always op params. When an `op` key is present it holds
    /// the payload (a map, or a statement string stored as `stmt`) and any
    /// other key becomes an op param. Without `op`, every other key is
    /// payload.
    ///
    /// # Errors
    /// Returns [`TemplateError::Invalid`] when a metadata key holds the
    /// wrong type.
    pub fn from_fields(
        name: impl Into<String>,
        mut fields: IndexMap<String, Value>,
    ) -> Result<Self, TemplateError> {
        let mut raw = Self::new(name);
        if let Some(value) = fields.shift_remove("name") {
            raw.name = value
                .as_string()
                .map_err(|e| TemplateError::invalid(&raw.name, format!("name: {e}")))?;
        }
        let op_name = raw.name.clone();

        if let Some(params) = fields.shift_remove("params") {
            raw.params = into_map(&op_name, "params", params)?;
        }
        if let Some(bindings) = fields.shift_remove("bindings") {
            raw.bindings = into_string_map(&op_name, "bindings", bindings)?;
        }
        if let Some(tags) = fields.shift_remove("tags") {
            raw.tags = into_string_map(&op_name, "tags", tags)?;
        }
        if let Some(ratio) = fields.shift_remove("ratio") {
            let n = ratio
                .as_i64()
                .map_err(|e| TemplateError::invalid(&op_name, format!("ratio: {e}")))?;
            raw.ratio = u32::try_from(n)
                .map_err(|_| TemplateError::invalid(&op_name, format!("ratio {n} is out of range")))?;
        }

        match fields.shift_remove("op") {
            Some(Value::Map(payload)) => {
                raw.op = payload;
                for (k, v) in fields {
                    raw.params.entry(k).or_insert(v);
                }
            }
            Some(Value::Text(stmt)) => {
                raw.op.insert("stmt".to_string(), Value::Text(stmt));
                for (k, v) in fields {
                    raw.params.entry(k).or_insert(v);
                }
            }
            Some(Value::Null) | None => raw.op = fields,
            Some(other) => {
                return Err(TemplateError::invalid(
                    &op_name,
                    format!("'op' must be a map or a statement, found {}", other.type_name()),
                ))
            }
        }
        Ok(raw)
    }

    /// Add a payload field
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.op.insert(name.into(), value.into());
        self
    }

    /// Add an op param
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Declare a binding
    #[must_use]
    pub fn with_binding(mut self, anchor: impl Into<String>, recipe: impl Into<String>) -> Self {
        self.bindings.insert(anchor.into(), recipe.into());
        self
    }

    /// Add a tag
    #[must_use]
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    /// Set the ratio
    #[must_use]
    pub fn with_ratio(mut self, ratio: u32) -> Self {
        self.ratio = ratio;
        self
    }

    /// Statement text, when the payload has a `stmt` string
    #[must_use]
    pub fn stmt(&self) -> Option<&str> {
        self.op.get("stmt").and_then(Value::as_text)
    }
}

fn into_map(op: &str, key: &str, value: Value) -> Result<IndexMap<String, Value>, TemplateError> {
    match value {
        Value::Map(map) => Ok(map),
        Value::Null => Ok(IndexMap::new()),
        other => Err(TemplateError::invalid(
            op,
            format!("'{key}' must be a map, found {}", other.type_name()),
        )),
    }
}

fn into_string_map(op: &str, key: &str, value: Value) -> Result<IndexMap<String, String>, TemplateError> {
    into_map(op, key, value)?
        .into_iter()
        .map(|(k, v)| match v {
            Value::Text(s) => Ok((k, s)),
            Value::List(_) | Value::Map(_) => Err(TemplateError::invalid(
                op,
                format!("'{key}.{k}' must be a scalar, found {}", v.type_name()),
            )),
            scalar => Ok((k, scalar.to_string())),
        })
        .collect()
}

/// A resolved op template
#[derive(Clone)]
pub struct ParsedTemplateMap {
    name: String,
    order: Vec<String>,
    statics: IndexMap<String, Value>,
    dynamics: IndexMap<String, DynamicField>,
    captures: Vec<CapturePoint>,
    op_params: IndexMap<String, Value>,
    activity: Option<Arc<dyn ConfigSource>>,
}

impl fmt::Debug for ParsedTemplateMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedTemplateMap")
            .field("name", &self.name)
            .field("statics", &self.statics)
            .field("dynamics", &self.dynamics.keys().collect::<Vec<_>>())
            .field("op_params", &self.op_params)
            .finish_non_exhaustive()
    }
}

impl ParsedTemplateMap {
    /// Classify every payload field of `raw` and compile its bind points
    ///
    /// A payload field that shadows a same-named op param or activity
    /// param is logged as a warning; the payload value wins.
    ///
    /// # Errors
    /// Returns [`TemplateError`] for unresolved anchors, recipes that fail
    /// to compile, and ambiguous map values. Nothing is evaluated yet, so
    /// no per-cycle error can surface here.
    pub fn resolve(
        raw: &RawOpTemplate,
        activity: Option<Arc<dyn ConfigSource>>,
        compiler: &BindingCompiler,
    ) -> Result<Self, TemplateError> {
        let mut parser = FieldParser::new(&raw.name, &raw.bindings, compiler);
        let mut order = Vec::with_capacity(raw.op.len());
        let mut statics = IndexMap::new();
        let mut dynamics = IndexMap::new();

        for (field, value) in &raw.op {
            order.push(field.clone());
            match parser.parse(field, value)? {
                FieldTemplate::Static(value) => {
                    statics.insert(field.clone(), value);
                }
                FieldTemplate::Dynamic(dynamic) => {
                    dynamics.insert(field.clone(), dynamic);
                }
            }

            if raw.params.contains_key(field) {
                tracing::warn!(op = %raw.name, field = %field, tier = OP_PARAMS,
                    "op field shadows a param of the same name; the op field is used");
            }
            if let Some(source) = activity.as_deref().filter(|s| s.contains(field)) {
                tracing::warn!(op = %raw.name, field = %field, tier = source.source_name(),
                    "op field shadows a param of the same name; the op field is used");
            }
        }

        tracing::debug!(
            op = %raw.name,
            statics = statics.len(),
            dynamics = dynamics.len(),
            "resolved op template"
        );

        Ok(Self {
            name: raw.name.clone(),
            order,
            statics,
            dynamics,
            captures: parser.into_captures(),
            op_params: raw.params.clone(),
            activity,
        })
    }

    /// Op name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capture points found in payload fields
    #[inline]
    #[must_use]
    pub fn captures(&self) -> &[CapturePoint] {
        &self.captures
    }

    /// Payload field names in declaration order
    #[must_use]
    pub fn op_field_names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Static payload fields
    #[inline]
    #[must_use]
    pub fn static_prototype(&self) -> &IndexMap<String, Value> {
        &self.statics
    }

    /// Op params as declared
    #[inline]
    #[must_use]
    pub fn op_params(&self) -> &IndexMap<String, Value> {
        &self.op_params
    }

    /// Whether no payload field depends on the cycle
    #[inline]
    #[must_use]
    pub fn is_static_map(&self) -> bool {
        self.dynamics.is_empty()
    }

    /// Whether `name` is a static payload field
    #[inline]
    #[must_use]
    pub fn is_static(&self, name: &str) -> bool {
        self.statics.contains_key(name)
    }

    /// Whether `name` is a dynamic payload field
    #[inline]
    #[must_use]
    pub fn is_dynamic(&self, name: &str) -> bool {
        self.dynamics.contains_key(name)
    }

    /// Whether `name` is defined at a config tier
    #[must_use]
    pub fn is_config(&self, name: &str) -> bool {
        self.op_params.contains_key(name) || self.activity.as_deref().is_some_and(|s| s.contains(name))
    }

    /// Whether `name` is defined at any tier
    #[must_use]
    pub fn is_defined(&self, name: &str) -> bool {
        self.is_static(name) || self.is_dynamic(name) || self.is_config(name)
    }

    /// Whether every name in `names` is defined at some tier
    #[must_use]
    pub fn is_defined_all(&self, names: &[&str]) -> bool {
        names.iter().all(|n| self.is_defined(n))
    }

    /// Payload values for one cycle, in declaration order
    ///
    /// # Errors
    /// Returns [`OpConfigError::Eval`] if a dynamic field fails.
    pub fn apply(&self, cycle: i64) -> Result<IndexMap<String, Value>, OpConfigError> {
        let mut out = IndexMap::with_capacity(self.order.len());
        self.apply_into(cycle, &mut out)?;
        Ok(out)
    }

    /// Payload values for one cycle, written into a reused map
    ///
    /// `out` is cleared first.
    ///
    /// # Errors
    /// Returns [`OpConfigError::Eval`] if a dynamic field fails.
    pub fn apply_into(&self, cycle: i64, out: &mut IndexMap<String, Value>) -> Result<(), OpConfigError> {
        out.clear();
        for name in &self.order {
            let value = match self.statics.get(name) {
                Some(value) => value.clone(),
                None => match self.dynamics.get(name) {
                    Some(dynamic) => self.eval(name, dynamic, cycle)?,
                    None => continue,
                },
            };
            out.insert(name.clone(), value);
        }
        Ok(())
    }

    /// Value of `name` for one cycle, from whichever tier defines it
    ///
    /// # Errors
    /// Returns [`OpConfigError::MissingField`] when no tier defines the
    /// name, [`OpConfigError::DynamicConfig`] when a config tier holds a
    /// bind point, and [`OpConfigError::Eval`] if the field fails.
    pub fn get(&self, name: &str, cycle: i64) -> Result<Value, OpConfigError> {
        self.lookup(name, cycle)?.ok_or_else(|| self.missing(name))
    }

    /// Typed [`ParsedTemplateMap::get`]
    ///
    /// # Errors
    /// As [`ParsedTemplateMap::get`], plus [`OpConfigError::Cast`].
    pub fn get_as<T: FromValue>(&self, name: &str, cycle: i64) -> Result<T, OpConfigError> {
        let value = self.get(name, cycle)?;
        self.cast(name, &value)
    }

    /// Static payload value of `name`
    #[inline]
    #[must_use]
    pub fn get_static(&self, name: &str) -> Option<&Value> {
        self.statics.get(name)
    }

    /// Static payload value of `name`, or `default` when absent
    ///
    /// Config tiers are not consulted.
    ///
    /// # Errors
    /// Returns [`OpConfigError::StaticRequired`] when the field is dynamic
    /// and [`OpConfigError::Cast`] when it has the wrong type.
    pub fn get_static_value_or<T: FromValue>(&self, name: &str, default: T) -> Result<T, OpConfigError> {
        if let Some(value) = self.statics.get(name) {
            return self.cast(name, value);
        }
        if self.dynamics.contains_key(name) {
            return Err(self.static_required(name));
        }
        Ok(default)
    }

    /// Value of `name` from any tier, or `default` when none defines it
    ///
    /// # Errors
    /// Returns [`OpConfigError::Cast`] for values of the wrong type,
    /// [`OpConfigError::DynamicConfig`] when a config tier holds a bind
    /// point, and [`OpConfigError::Eval`] if a dynamic field fails.
    pub fn get_config_or<T: FromValue>(&self, name: &str, default: T, cycle: i64) -> Result<T, OpConfigError> {
        match self.lookup(name, cycle)? {
            Some(value) => self.cast(name, &value),
            None => Ok(default),
        }
    }

    /// Typed value of `name` from any tier, if defined
    ///
    /// # Errors
    /// As [`ParsedTemplateMap::get_config_or`].
    pub fn get_optional_config<T: FromValue>(&self, name: &str, cycle: i64) -> Result<Option<T>, OpConfigError> {
        self.lookup(name, cycle)?
            .map(|value| self.cast(name, &value))
            .transpose()
    }

    /// Static value of `name` from any tier, or `default` when none
    /// defines it
    ///
    /// # Errors
    /// Returns [`OpConfigError::StaticRequired`] when the payload field is
    /// dynamic, plus the errors of [`ParsedTemplateMap::get_config_or`].
    pub fn get_static_config_or<T: FromValue>(&self, name: &str, default: T) -> Result<T, OpConfigError> {
        match self.static_lookup(name)? {
            Some(value) => self.cast(name, &value),
            None => Ok(default),
        }
    }

    /// Static value of `name` from any tier
    ///
    /// # Errors
    /// As [`ParsedTemplateMap::get_static_config_or`], plus
    /// [`OpConfigError::MissingField`].
    pub fn get_static_config<T: FromValue>(&self, name: &str) -> Result<T, OpConfigError> {
        let value = self.static_lookup(name)?.ok_or_else(|| self.missing(name))?;
        self.cast(name, &value)
    }

    /// Remove a static payload field, returning its value
    ///
    /// Falls back to the config tiers without removing anything there.
    /// Drivers use this to consume fields they handle themselves so they no
    /// longer appear in [`ParsedTemplateMap::apply`].
    ///
    /// # Errors
    /// Returns [`OpConfigError::StaticRequired`] when the field is dynamic
    /// and [`OpConfigError::DynamicConfig`] when a config tier holds a bind
    /// point.
    pub fn take_static_value(&mut self, name: &str) -> Result<Option<Value>, OpConfigError> {
        if let Some(value) = self.statics.shift_remove(name) {
            self.order.retain(|n| n != name);
            return Ok(Some(value));
        }
        if self.dynamics.contains_key(name) {
            return Err(self.static_required(name));
        }
        self.config_lookup(name)
    }

    /// A per-cycle accessor for `name`, whichever tier defines it
    ///
    /// The accessor is checked once against cycle 0 so a field of the
    /// wrong type is reported now rather than on the first cycle.
    ///
    /// # Errors
    /// Returns [`OpConfigError::MissingField`] when no tier defines the
    /// name, or any error the cycle 0 check raises.
    pub fn get_as_function<T>(&self, name: &str) -> Result<CycleFn<T>, OpConfigError>
    where
        T: FromValue + Clone + Send + Sync + 'static,
    {
        self.get_as_optional_function(name)?.ok_or_else(|| self.missing(name))
    }

    /// As [`ParsedTemplateMap::get_as_function`], with `None` when no tier
    /// defines the name
    ///
    /// # Errors
    /// Returns any error the cycle 0 check raises.
    pub fn get_as_optional_function<T>(&self, name: &str) -> Result<Option<CycleFn<T>>, OpConfigError>
    where
        T: FromValue + Clone + Send + Sync + 'static,
    {
        if let Some(dynamic) = self.dynamics.get(name) {
            let sample = self.eval(name, dynamic, 0)?;
            self.cast::<T>(name, &sample)?;

            let dynamic = dynamic.clone();
            let op = self.name.clone();
            let field = name.to_string();
            let f: CycleFn<T> = Arc::new(move |cycle| {
                let value = dynamic.apply(cycle).map_err(|source| OpConfigError::Eval {
                    op: op.clone(),
                    field: field.clone(),
                    cycle,
                    source,
                })?;
                T::from_value(&value).map_err(|source| OpConfigError::Cast {
                    op: op.clone(),
                    field: field.clone(),
                    source,
                })
            });
            return Ok(Some(f));
        }

        match self.static_lookup(name)? {
            Some(value) => {
                let fixed: T = self.cast(name, &value)?;
                let f: CycleFn<T> = Arc::new(move |_: i64| Ok(fixed.clone()));
                Ok(Some(f))
            }
            None => Ok(None),
        }
    }

    /// Read a static field as an enum variant
    ///
    /// The text is lowercased and stripped of everything but letters,
    /// digits and underscores before `E::from_str` sees it, so `Local-One`
    /// and `LOCAL_ONE` read the same way when `E` parses `local_one`.
    ///
    /// # Errors
    /// Returns [`OpConfigError::InvalidEnum`] when `E` rejects the text,
    /// plus the errors of [`ParsedTemplateMap::get_static_config`].
    pub fn get_enum_from_field<E: FromStr>(&self, name: &str) -> Result<Option<E>, OpConfigError> {
        let Some(value) = self.static_lookup(name)? else {
            return Ok(None);
        };
        let text: String = self.cast(name, &value)?;
        let normalized: String = text
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .flat_map(char::to_lowercase)
            .collect();
        normalized.parse::<E>().map(Some).map_err(|_| OpConfigError::InvalidEnum {
            op: self.name.clone(),
            field: name.to_string(),
            value: text,
            expected: short_type_name::<E>().to_string(),
        })
    }

    /// All config-tier values merged, op params first
    ///
    /// A key defined in more than one config tier is logged, since callers
    /// of this view cannot tell which tier it came from.
    #[must_use]
    pub fn config_prototype(&self) -> IndexMap<String, Value> {
        let mut merged = self.op_params.clone();
        if let Some(source) = self.activity.as_deref() {
            for key in source.keys() {
                if merged.contains_key(&key) {
                    tracing::warn!(op = %self.name, key = %key,
                        "config sources contain overlapping keys, precedence is undefined");
                    continue;
                }
                if let Some(value) = source.lookup(&key) {
                    merged.insert(key, value);
                }
            }
        }
        merged
    }

    fn lookup(&self, name: &str, cycle: i64) -> Result<Option<Value>, OpConfigError> {
        if let Some(value) = self.statics.get(name) {
            return Ok(Some(value.clone()));
        }
        if let Some(dynamic) = self.dynamics.get(name) {
            return self.eval(name, dynamic, cycle).map(Some);
        }
        self.config_lookup(name)
    }

    fn static_lookup(&self, name: &str) -> Result<Option<Value>, OpConfigError> {
        if let Some(value) = self.statics.get(name) {
            return Ok(Some(value.clone()));
        }
        if self.dynamics.contains_key(name) {
            return Err(self.static_required(name));
        }
        self.config_lookup(name)
    }

    fn config_lookup(&self, name: &str) -> Result<Option<Value>, OpConfigError> {
        let found = match self.op_params.get(name) {
            Some(value) => Some((OP_PARAMS, value.clone())),
            None => self
                .activity
                .as_deref()
                .and_then(|s| s.lookup(name).map(|v| (tier_name(s), v))),
        };
        match found {
            Some((tier, value)) if holds_bind_point(&value) => Err(OpConfigError::DynamicConfig {
                op: self.name.clone(),
                field: name.to_string(),
                tier,
            }),
            Some((_, value)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    fn eval(&self, name: &str, dynamic: &DynamicField, cycle: i64) -> Result<Value, OpConfigError> {
        dynamic.apply(cycle).map_err(|source| OpConfigError::Eval {
            op: self.name.clone(),
            field: name.to_string(),
            cycle,
            source,
        })
    }

    fn cast<T: FromValue>(&self, name: &str, value: &Value) -> Result<T, OpConfigError> {
        T::from_value(value).map_err(|source| OpConfigError::Cast {
            op: self.name.clone(),
            field: name.to_string(),
            source,
        })
    }

    fn missing(&self, name: &str) -> OpConfigError {
        OpConfigError::MissingField {
            op: self.name.clone(),
            field: name.to_string(),
        }
    }

    fn static_required(&self, name: &str) -> OpConfigError {
        OpConfigError::StaticRequired {
            op: self.name.clone(),
            field: name.to_string(),
        }
    }
}

fn tier_name(source: &dyn ConfigSource) -> &'static str {
    match source.source_name() {
        OP_PARAMS => OP_PARAMS,
        "activity params" => "activity params",
        _ => "config",
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn compiler() -> BindingCompiler {
        BindingCompiler::default()
    }

    fn activity(pairs: &[(&str, &str)]) -> Arc<dyn ConfigSource> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Arc::new(map)
    }

    #[test]
    fn from_fields_without_op_key() {
        let fields: IndexMap<String, Value> = IndexMap::from([
            ("stmt".to_string(), Value::from("select 1")),
            ("ratio".to_string(), Value::Long(3)),
            (
                "params".to_string(),
                Value::Map(IndexMap::from([("cl".to_string(), Value::from("ONE"))])),
            ),
        ]);
        let raw = RawOpTemplate::from_fields("read", fields).unwrap();
        assert_eq!(raw.op.keys().collect::<Vec<_>>(), vec!["stmt"]);
        assert_eq!(raw.params["cl"], Value::from("ONE"));
        assert_eq!(raw.ratio, 3);
        assert_eq!(raw.stmt(), Some("select 1"));
    }

    #[test]
    fn from_fields_with_op_key_moves_rest_to_params() {
        let fields: IndexMap<String, Value> = IndexMap::from([
            ("op".to_string(), Value::from("select 1")),
            ("timeout".to_string(), Value::Long(5)),
        ]);
        let raw = RawOpTemplate::from_fields("read", fields).unwrap();
        assert_eq!(raw.stmt(), Some("select 1"));
        assert_eq!(raw.params["timeout"], Value::Long(5));
    }

    #[test]
    fn from_fields_rejects_bad_metadata() {
        let fields: IndexMap<String, Value> =
            IndexMap::from([("bindings".to_string(), Value::from("oops"))]);
        assert!(matches!(
            RawOpTemplate::from_fields("x", fields),
            Err(TemplateError::Invalid { .. })
        ));
    }

    #[test]
    fn resolve_classifies_fields() {
        let raw = RawOpTemplate::new("op1")
            .with_field("stmt", "insert {id}")
            .with_field("kind", "write")
            .with_field("key", "{id}")
            .with_binding("id", "Identity()");
        let map = ParsedTemplateMap::resolve(&raw, None, &compiler()).unwrap();

        assert!(map.is_static("kind"));
        assert!(map.is_dynamic("stmt"));
        assert!(map.is_dynamic("key"));
        assert!(!map.is_static_map());
        assert_eq!(map.op_field_names(), vec!["stmt", "kind", "key"]);

        let applied = map.apply(9).unwrap();
        assert_eq!(applied.keys().collect::<Vec<_>>(), vec!["stmt", "kind", "key"]);
        assert_eq!(applied["stmt"], Value::from("insert 9"));
        assert_eq!(applied["key"], Value::Long(9));
    }

    #[test]
    fn config_accessors_fall_back_through_tiers() {
        let raw = RawOpTemplate::new("op1")
            .with_field("stmt", "select 1")
            .with_param("timeout", 30_i64);
        let map = ParsedTemplateMap::resolve(&raw, Some(activity(&[("retries", "3")])), &compiler()).unwrap();

        assert_eq!(map.get_static_config::<i64>("timeout").unwrap(), 30);
        assert_eq!(map.get_static_config::<u64>("retries").unwrap(), 3);
        assert_eq!(map.get_static_config_or("absent", 7_i64).unwrap(), 7);
        assert_eq!(map.get_optional_config::<i64>("absent", 0).unwrap(), None);
        assert!(map.is_config("retries"));
        assert!(map.is_defined("stmt"));
        assert!(!map.is_defined("absent"));
        assert!(map.get_static_config::<i64>("absent").unwrap_err().is_missing());
    }

    #[test]
    fn static_value_or_ignores_config_tiers() {
        let raw = RawOpTemplate::new("op1").with_param("timeout", 30_i64);
        let map = ParsedTemplateMap::resolve(&raw, None, &compiler()).unwrap();
        assert_eq!(map.get_static_value_or("timeout", 1_i64).unwrap(), 1);
    }

    #[test]
    fn dynamic_payload_is_not_static_config() {
        let raw = RawOpTemplate::new("op1")
            .with_field("ttl", "{{Mod(10)}}")
            .with_param("ttl", 5_i64);
        let map = ParsedTemplateMap::resolve(&raw, None, &compiler()).unwrap();
        assert!(matches!(
            map.get_static_config::<i64>("ttl"),
            Err(OpConfigError::StaticRequired { .. })
        ));
        assert_eq!(map.get_config_or("ttl", 0_i64, 13).unwrap(), 3);
    }

    #[test]
    fn bind_point_in_params_is_an_error() {
        let raw = RawOpTemplate::new("op1").with_param("cl", "{cl}");
        let map = ParsedTemplateMap::resolve(&raw, None, &compiler()).unwrap();
        assert!(matches!(
            map.get_static_config::<String>("cl"),
            Err(OpConfigError::DynamicConfig { tier: "op params", .. })
        ));
    }

    #[test]
    fn cast_errors_name_the_field() {
        let raw = RawOpTemplate::new("op1").with_field("limit", "lots");
        let map = ParsedTemplateMap::resolve(&raw, None, &compiler()).unwrap();
        let err = map.get_static_config::<i64>("limit").unwrap_err();
        assert!(matches!(err, OpConfigError::Cast { ref field, .. } if field == "limit"));
    }

    #[test]
    fn take_static_value_removes_field() {
        let raw = RawOpTemplate::new("op1")
            .with_field("driver_hint", "fast")
            .with_field("stmt", "select 1");
        let mut map = ParsedTemplateMap::resolve(&raw, None, &compiler()).unwrap();
        assert_eq!(map.take_static_value("driver_hint").unwrap(), Some(Value::from("fast")));
        assert_eq!(map.op_field_names(), vec!["stmt"]);
        assert_eq!(map.apply(0).unwrap().len(), 1);
        assert_eq!(map.take_static_value("driver_hint").unwrap(), None);
    }

    #[test]
    fn get_as_function_covers_each_tier() {
        let raw = RawOpTemplate::new("op1")
            .with_field("n", "{{Mod(3)}}")
            .with_field("label", "fixed")
            .with_param("limit", "25")
            .with_binding("unused", "Identity()");
        let map = ParsedTemplateMap::resolve(&raw, None, &compiler()).unwrap();

        let n = map.get_as_function::<i64>("n").unwrap();
        assert_eq!((0..6).map(|c| n(c).unwrap()).collect::<Vec<_>>(), vec![0, 1, 2, 0, 1, 2]);

        let label = map.get_as_function::<String>("label").unwrap();
        assert_eq!(label(99).unwrap(), "fixed");

        let limit = map.get_as_function::<i64>("limit").unwrap();
        assert_eq!(limit(5).unwrap(), 25);

        assert!(map.get_as_function::<i64>("label").is_err());
        assert!(matches!(map.get_as_function::<i64>("absent"), Err(e) if e.is_missing()));
    }

    #[derive(Debug, PartialEq)]
    enum Consistency {
        One,
        LocalQuorum,
    }

    impl FromStr for Consistency {
        type Err = ();

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s {
                "one" => Ok(Self::One),
                "local_quorum" | "localquorum" => Ok(Self::LocalQuorum),
                _ => Err(()),
            }
        }
    }

    #[test]
    fn enum_fields_are_normalized() {
        let raw = RawOpTemplate::new("op1")
            .with_field("cl", "LOCAL_QUORUM")
            .with_param("fallback", "One")
            .with_field("bad", "three");
        let map = ParsedTemplateMap::resolve(&raw, None, &compiler()).unwrap();
        assert_eq!(map.get_enum_from_field::<Consistency>("cl").unwrap(), Some(Consistency::LocalQuorum));
        assert_eq!(map.get_enum_from_field::<Consistency>("fallback").unwrap(), Some(Consistency::One));
        assert_eq!(map.get_enum_from_field::<Consistency>("absent").unwrap(), None);
        assert!(matches!(
            map.get_enum_from_field::<Consistency>("bad"),
            Err(OpConfigError::InvalidEnum { ref expected, .. }) if expected == "Consistency"
        ));
    }

    #[test]
    fn config_prototype_merges_tiers() {
        let raw = RawOpTemplate::new("op1").with_param("a", 1_i64);
        let map = ParsedTemplateMap::resolve(&raw, Some(activity(&[("a", "2"), ("b", "3")])), &compiler()).unwrap();
        let proto = map.config_prototype();
        assert_eq!(proto["a"], Value::Long(1));
        assert_eq!(proto["b"], Value::from("3"));
    }

    #[test]
    fn captures_are_collected() {
        let raw = RawOpTemplate::new("op1").with_field("stmt", "select [a], [b as c] from t");
        let map = ParsedTemplateMap::resolve(&raw, None, &compiler()).unwrap();
        assert_eq!(map.captures().len(), 2);
        assert_eq!(map.get_static("stmt"), Some(&Value::from("select a, b from t")));
    }
}
