//! Workload documents
//!
//! A workload is a YAML document declaring shared bindings, shared params
//! and a set of ops:
//!
//! ```yaml
//! bindings:
//!   id: Mod(1000)
//! params:
//!   consistency: one
//! ops:
//!   read: "select * from t where id={id}"
//!   write:
//!     op:
//!       stmt: "insert into t (id) values ({id})"
//!     ratio: 2
//! ```
//!
//! `ops` may also be a list, in which case each entry is named by its
//! `name` key or by its position (`op1`, `op2`, ...). Shared bindings and
//! params are merged under each op's own declarations.

use crate::error::ActivityError;
use cb_templating::RawOpTemplate;
use cb_virtdata::Value;
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WorkloadDoc {
    bindings: IndexMap<String, String>,
    params: IndexMap<String, Value>,
    tags: IndexMap<String, String>,
    #[serde(alias = "statements")]
    ops: Option<OpsDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OpsDoc {
    Map(IndexMap<String, Value>),
    List(Vec<Value>),
}

/// A named set of op templates
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    name: String,
    ops: Vec<RawOpTemplate>,
}

impl Workload {
    /// Build from already declared ops
    #[must_use]
    pub fn new(name: impl Into<String>, ops: Vec<RawOpTemplate>) -> Self {
        Self {
            name: name.into(),
            ops,
        }
    }

    /// A single `stmt` op named `stmt`
    #[must_use]
    pub fn inline(name: impl Into<String>, stmt: &str) -> Self {
        Self::new(name, vec![RawOpTemplate::from_statement("stmt", stmt)])
    }

    /// Parse a YAML document
    ///
    /// # Errors
    /// Returns [`ActivityError::Workload`] if the document is not valid
    /// YAML, declares no ops, or an op is malformed.
    pub fn from_yaml_str(name: &str, text: &str) -> Result<Self, ActivityError> {
        let doc: WorkloadDoc =
            serde_yaml::from_str(text).map_err(|e| ActivityError::workload(name, e.to_string()))?;

        let declared: Vec<RawOpTemplate> = match doc.ops {
            None => return Err(ActivityError::workload(name, "no ops declared")),
            Some(OpsDoc::Map(ops)) => ops
                .into_iter()
                .map(|(op_name, value)| op_from_value(name, op_name, value))
                .collect::<Result<_, _>>()?,
            Some(OpsDoc::List(ops)) => ops
                .into_iter()
                .enumerate()
                .map(|(i, value)| op_from_value(name, format!("op{}", i + 1), value))
                .collect::<Result<_, _>>()?,
        };

        let ops = declared
            .into_iter()
            .map(|op| merge_shared(op, &doc.bindings, &doc.params, &doc.tags))
            .collect::<Vec<_>>();
        if ops.is_empty() {
            return Err(ActivityError::workload(name, "no ops declared"));
        }
        tracing::debug!(workload = name, ops = ops.len(), "workload parsed");
        Ok(Self::new(name, ops))
    }

    /// Read and parse a YAML file; the workload is named by the file stem
    ///
    /// # Errors
    /// Returns [`ActivityError::Workload`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ActivityError> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map_or_else(|| path.display().to_string(), |s| s.to_string_lossy().into_owned());
        let text = std::fs::read_to_string(path)
            .map_err(|e| ActivityError::workload(path.display().to_string(), e.to_string()))?;
        Self::from_yaml_str(&name, &text)
    }

    /// Workload name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared ops
    #[inline]
    #[must_use]
    pub fn ops(&self) -> &[RawOpTemplate] {
        &self.ops
    }
}

fn op_from_value(workload: &str, name: String, value: Value) -> Result<RawOpTemplate, ActivityError> {
    match value {
        Value::Text(stmt) => Ok(RawOpTemplate::from_statement(name, stmt)),
        Value::Map(fields) => RawOpTemplate::from_fields(name, fields)
            .map_err(|e| ActivityError::workload(workload, e.to_string())),
        other => Err(ActivityError::workload(
            workload,
            format!("op '{name}' must be a statement or a map, found {}", other.type_name()),
        )),
    }
}

fn merge_shared(
    mut op: RawOpTemplate,
    bindings: &IndexMap<String, String>,
    params: &IndexMap<String, Value>,
    tags: &IndexMap<String, String>,
) -> RawOpTemplate {
    for (k, v) in bindings {
        op.bindings.entry(k.clone()).or_insert_with(|| v.clone());
    }
    for (k, v) in params {
        op.params.entry(k.clone()).or_insert_with(|| v.clone());
    }
    for (k, v) in tags {
        op.tags.entry(k.clone()).or_insert_with(|| v.clone());
    }
    op
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DOC: &str = r#"
bindings:
  id: Mod(1000)
  name: AlphaNumeric(8)
params:
  consistency: one
ops:
  read: "select * from t where id={id}"
  write:
    op:
      stmt: "insert into t (id, name) values ({id}, {name})"
    bindings:
      id: Mod(10)
    params:
      consistency: all
    ratio: 2
"#;

    #[test]
    fn map_ops_merge_shared_declarations() {
        let workload = Workload::from_yaml_str("kv", DOC).unwrap();
        assert_eq!(workload.name(), "kv");
        let [read, write] = workload.ops() else {
            panic!("expected two ops");
        };

        assert_eq!(read.name, "read");
        assert_eq!(read.stmt(), Some("select * from t where id={id}"));
        assert_eq!(read.bindings["id"], "Mod(1000)");
        assert_eq!(read.params["consistency"], Value::from("one"));
        assert_eq!(read.ratio, 1);

        assert_eq!(write.ratio, 2);
        assert_eq!(write.bindings["id"], "Mod(10)");
        assert_eq!(write.bindings["name"], "AlphaNumeric(8)");
        assert_eq!(write.params["consistency"], Value::from("all"));
    }

    #[test]
    fn list_ops_are_named_by_position() {
        let doc = "ops:\n  - \"select 1\"\n  - name: second\n    stmt: \"select 2\"\n";
        let workload = Workload::from_yaml_str("l", doc).unwrap();
        let names: Vec<&str> = workload.ops().iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["op1", "second"]);
        assert_eq!(workload.ops()[1].stmt(), Some("select 2"));
    }

    #[test]
    fn missing_or_bad_ops_are_rejected() {
        assert!(Workload::from_yaml_str("w", "bindings: {}\n").is_err());
        assert!(Workload::from_yaml_str("w", "ops: {}\n").is_err());
        assert!(Workload::from_yaml_str("w", "ops:\n  a: 5\n").is_err());
        assert!(Workload::from_yaml_str("w", "ops: [\n").is_err());
    }

    #[test]
    fn inline_statement() {
        let workload = Workload::inline("a", "select {cycle}");
        assert_eq!(workload.ops().len(), 1);
        assert_eq!(workload.ops()[0].stmt(), Some("select {cycle}"));
    }
}
