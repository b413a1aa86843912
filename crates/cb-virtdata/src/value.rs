//! Tagged values
//!
//! [`Value`] is the single dynamic value type shared by bindings, op
//! templates and parameter maps. Typed reads go through [`FromValue`], which
//! returns a [`ValueError`] on mismatch instead of guessing.

use crate::error::ValueError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dynamically typed value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent or null
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Long(i64),
    /// 32-bit integer
    Int(i32),
    /// Double precision float
    Double(f64),
    /// Text
    Text(String),
    /// Ordered sequence
    List(Vec<Value>),
    /// Ordered string-keyed map
    Map(IndexMap<String, Value>),
}

impl Value {
    /// Name of the held type, used in diagnostics
    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Long(_) => "long",
            Self::Int(_) => "int",
            Self::Double(_) => "double",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Check for null
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Borrow as text if this is a text value
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as a map if this is a map value
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Read as a 64-bit integer
    ///
    /// Integral doubles and decimal text are accepted.
    ///
    /// # Errors
    /// Returns [`ValueError`] if the value holds no integer.
    pub fn as_i64(&self) -> Result<i64, ValueError> {
        i64::from_value(self)
    }

    /// Read as a double
    ///
    /// # Errors
    /// Returns [`ValueError`] if the value holds no number.
    pub fn as_f64(&self) -> Result<f64, ValueError> {
        f64::from_value(self)
    }

    /// Read as a boolean
    ///
    /// # Errors
    /// Returns [`ValueError`] if the value is neither a bool nor `true`/`false` text.
    pub fn as_bool(&self) -> Result<bool, ValueError> {
        bool::from_value(self)
    }

    /// Read as text
    ///
    /// Scalars render to their text form. Lists and maps are rejected.
    ///
    /// # Errors
    /// Returns [`ValueError`] for lists and maps.
    pub fn as_string(&self) -> Result<String, ValueError> {
        String::from_value(self)
    }

    fn mismatch(&self, expected: &'static str) -> ValueError {
        ValueError::TypeMismatch {
            expected,
            found: self.type_name(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
            Self::List(_) | Self::Map(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(v: IndexMap<String, Value>) -> Self {
        Self::Map(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Long(i),
                None => Self::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::Text(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

/// Fallible typed read from a [`Value`]
pub trait FromValue: Sized {
    /// Human readable name of the target type
    const EXPECTED: &'static str;

    /// Read `value` as `Self`
    ///
    /// # Errors
    /// Returns [`ValueError`] when the value cannot be represented as `Self`.
    fn from_value(value: &Value) -> Result<Self, ValueError>;
}

fn parse_text<T: std::str::FromStr>(text: &str, expected: &'static str) -> Result<T, ValueError> {
    text.trim().parse().map_err(|_| ValueError::Unparseable {
        text: text.to_string(),
        expected,
    })
}

impl FromValue for i64 {
    const EXPECTED: &'static str = "integer";

    #[allow(clippy::cast_possible_truncation)]
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Long(v) => Ok(*v),
            Value::Int(v) => Ok(i64::from(*v)),
            Value::Double(d) if d.fract() == 0.0 && d.is_finite() => Ok(*d as i64),
            Value::Text(s) => parse_text(s, Self::EXPECTED),
            other => Err(other.mismatch(Self::EXPECTED)),
        }
    }
}

impl FromValue for i32 {
    const EXPECTED: &'static str = "32-bit integer";

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        let wide = i64::from_value(value).map_err(|_| value.mismatch(Self::EXPECTED))?;
        i32::try_from(wide).map_err(|_| ValueError::OutOfRange {
            value: wide.to_string(),
            expected: Self::EXPECTED,
        })
    }
}

impl FromValue for u64 {
    const EXPECTED: &'static str = "unsigned integer";

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        let wide = i64::from_value(value).map_err(|_| value.mismatch(Self::EXPECTED))?;
        u64::try_from(wide).map_err(|_| ValueError::OutOfRange {
            value: wide.to_string(),
            expected: Self::EXPECTED,
        })
    }
}

impl FromValue for usize {
    const EXPECTED: &'static str = "unsigned integer";

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        let wide = i64::from_value(value).map_err(|_| value.mismatch(Self::EXPECTED))?;
        usize::try_from(wide).map_err(|_| ValueError::OutOfRange {
            value: wide.to_string(),
            expected: Self::EXPECTED,
        })
    }
}

impl FromValue for f64 {
    const EXPECTED: &'static str = "number";

    #[allow(clippy::cast_precision_loss)]
    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Double(d) => Ok(*d),
            Value::Long(v) => Ok(*v as f64),
            Value::Int(v) => Ok(f64::from(*v)),
            Value::Text(s) => parse_text(s, Self::EXPECTED),
            other => Err(other.mismatch(Self::EXPECTED)),
        }
    }
}

impl FromValue for bool {
    const EXPECTED: &'static str = "boolean";

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Text(s) => parse_text(s, Self::EXPECTED),
            other => Err(other.mismatch(Self::EXPECTED)),
        }
    }
}

impl FromValue for String {
    const EXPECTED: &'static str = "text";

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            Value::List(_) | Value::Map(_) | Value::Null => Err(value.mismatch(Self::EXPECTED)),
            scalar => Ok(scalar.to_string()),
        }
    }
}

impl FromValue for Value {
    const EXPECTED: &'static str = "value";

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        Ok(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_display_renders_scalars_plainly() {
        assert_eq!(Value::Long(42).to_string(), "42");
        assert_eq!(Value::Text("abc".into()).to_string(), "abc");
        assert_eq!(Value::Double(1.5).to_string(), "1.5");
        assert_eq!(Value::Bool(true).to_string(), "true");
    }

    #[test]
    fn value_display_renders_structures_as_json() {
        let mut map = IndexMap::new();
        map.insert("a".to_string(), Value::Long(1));
        map.insert("b".to_string(), Value::List(vec![Value::from("x")]));
        assert_eq!(Value::Map(map).to_string(), r#"{"a":1,"b":["x"]}"#);
    }

    #[test]
    fn from_value_accepts_numeric_text() {
        assert_eq!(Value::from("17").as_i64(), Ok(17));
        assert_eq!(Value::from(" 2.5 ").as_f64(), Ok(2.5));
        assert_eq!(Value::from("true").as_bool(), Ok(true));
        assert_eq!(usize::from_value(&Value::from("4")), Ok(4));
    }

    #[test]
    fn from_value_reports_mismatch() {
        let err = Value::List(vec![]).as_i64().unwrap_err();
        assert_eq!(
            err,
            ValueError::TypeMismatch {
                expected: "integer",
                found: "list"
            }
        );
        assert!(matches!(
            Value::from("abc").as_i64(),
            Err(ValueError::Unparseable { .. })
        ));
        assert!(matches!(
            i32::from_value(&Value::Long(i64::MAX)),
            Err(ValueError::OutOfRange { .. })
        ));
    }

    #[test]
    fn from_json_preserves_structure() {
        let json = serde_json::json!({"n": 3, "f": 0.5, "l": [true, null], "s": "x"});
        let value = Value::from(json);
        let map = value.as_map().unwrap();
        assert_eq!(map["n"], Value::Long(3));
        assert_eq!(map["f"], Value::Double(0.5));
        assert_eq!(map["l"], Value::List(vec![Value::Bool(true), Value::Null]));
        assert_eq!(map["s"], Value::from("x"));
    }

    #[test]
    fn deserialize_integers_as_long() {
        let value: Value = serde_json::from_str("12").unwrap();
        assert_eq!(value, Value::Long(12));
        let value: Value = serde_json::from_str("[1, 2.5]").unwrap();
        assert_eq!(value, Value::List(vec![Value::Long(1), Value::Double(2.5)]));
    }
}
