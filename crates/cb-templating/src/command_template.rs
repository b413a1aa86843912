//! String-only op view
//!
//! Some drivers take an op as a flat set of named strings, for example
//! `method=GET; uri=http://host/{id}`. A [`CommandTemplate`] parses the
//! one-line statement with [`ParamsParser`], layers the op params on top
//! and renders every value to text per cycle.

use crate::error::TemplateError;
use crate::field::{ConcatTemplate, DynamicField, FieldParser, FieldTemplate};
use crate::params::ParamsParser;
use crate::template_map::RawOpTemplate;
use cb_virtdata::{BindingCompiler, FuncError, Value};
use indexmap::IndexMap;

#[derive(Debug, Clone)]
enum CommandField {
    Static(String),
    Raw(DynamicField),
    Concat(ConcatTemplate),
}

/// An op rendered as named strings
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    name: String,
    fields: IndexMap<String, CommandField>,
}

impl CommandTemplate {
    /// Build from an op template
    ///
    /// The `stmt` payload field, if any, is parsed as `name=value` text.
    /// Op params are then added, replacing same-named statement fields.
    ///
    /// # Errors
    /// Returns [`TemplateError`] if the statement is not parameter text or
    /// a bind point cannot be compiled.
    pub fn from_op(raw: &RawOpTemplate, compiler: &BindingCompiler) -> Result<Self, TemplateError> {
        let params: IndexMap<String, String> = raw
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect();
        Self::new(&raw.name, raw.stmt(), &params, &raw.bindings, compiler)
    }

    /// Build from parts
    ///
    /// # Errors
    /// Returns [`TemplateError`] if `oneline` is not parameter text or a
    /// bind point cannot be compiled.
    pub fn new(
        name: &str,
        oneline: Option<&str>,
        params: &IndexMap<String, String>,
        bindings: &IndexMap<String, String>,
        compiler: &BindingCompiler,
    ) -> Result<Self, TemplateError> {
        let mut command = match oneline {
            Some(text) => ParamsParser::parse(text).map_err(|source| TemplateError::Params {
                op: name.to_string(),
                source,
            })?,
            None => IndexMap::new(),
        };
        tracing::debug!(op = name, fields = command.len(), "parsed command statement");

        for (key, value) in params {
            if command.contains_key(key) {
                tracing::warn!(op = name, field = %key, value = %value,
                    "command property override: superseded by param form");
            }
            command.insert(key.clone(), value.clone());
        }

        let mut parser = FieldParser::new(name, bindings, compiler);
        let mut fields = IndexMap::with_capacity(command.len());
        for (key, value) in command {
            let field = match parser.parse(&key, &Value::Text(value))? {
                FieldTemplate::Static(value) => CommandField::Static(value.to_string()),
                FieldTemplate::Dynamic(DynamicField::Concat(concat)) => CommandField::Concat(concat),
                FieldTemplate::Dynamic(other) => CommandField::Raw(other),
            };
            fields.insert(key, field);
        }

        Ok(Self {
            name: name.to_string(),
            fields,
        })
    }

    /// Op name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every field rendered for one cycle
    ///
    /// # Errors
    /// Returns [`FuncError`] if a binding fails.
    pub fn get_command(&self, cycle: i64) -> Result<IndexMap<String, String>, FuncError> {
        self.fields
            .iter()
            .map(|(k, f)| Ok((k.clone(), render(f, cycle)?)))
            .collect()
    }

    /// One field rendered for one cycle
    ///
    /// # Errors
    /// Returns [`FuncError`] if a binding fails.
    pub fn get(&self, name: &str, cycle: i64) -> Result<Option<String>, FuncError> {
        self.fields.get(name).map(|f| render(f, cycle)).transpose()
    }

    /// Static field text
    #[must_use]
    pub fn get_static_field(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(CommandField::Static(text)) => Some(text),
            _ => None,
        }
    }

    /// Whether no field depends on the cycle
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.fields.values().all(|f| matches!(f, CommandField::Static(_)))
    }

    /// Whether `name` depends on the cycle
    #[must_use]
    pub fn is_dynamic(&self, name: &str) -> bool {
        matches!(self.fields.get(name), Some(CommandField::Raw(_) | CommandField::Concat(_)))
    }

    /// Whether `name` is defined
    #[must_use]
    pub fn contains_key(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Field names in order
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

fn render(field: &CommandField, cycle: i64) -> Result<String, FuncError> {
    match field {
        CommandField::Static(text) => Ok(text.clone()),
        CommandField::Concat(concat) => concat.apply(cycle),
        CommandField::Raw(dynamic) => dynamic.apply(cycle).map(|v| v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn command_from_oneline_and_params() {
        let raw = RawOpTemplate::from_statement("get", "method=GET; uri='http://host/items/{id}'; body=x")
            .with_param("body", "y")
            .with_binding("id", "Mod(10)");
        let command = CommandTemplate::from_op(&raw, &BindingCompiler::default()).unwrap();

        assert_eq!(command.name(), "get");
        assert_eq!(command.get_static_field("method"), Some("GET"));
        assert_eq!(command.get_static_field("body"), Some("y"));
        assert!(command.is_dynamic("uri"));
        assert!(!command.is_static());

        let rendered = command.get_command(23).unwrap();
        assert_eq!(rendered["uri"], "http://host/items/3");
        assert_eq!(
            command.field_names().collect::<Vec<_>>(),
            vec!["method", "uri", "body"]
        );
    }

    #[test]
    fn raw_bind_point_renders_as_text() {
        let bindings = IndexMap::from([("n".to_string(), "Mod(4)".to_string())]);
        let command = CommandTemplate::new(
            "op",
            Some("count={n}"),
            &IndexMap::new(),
            &bindings,
            &BindingCompiler::default(),
        )
        .unwrap();
        assert_eq!(command.get("count", 6).unwrap(), Some("2".to_string()));
        assert_eq!(command.get("absent", 6).unwrap(), None);
    }

    #[test]
    fn non_params_statement_is_rejected() {
        let raw = RawOpTemplate::from_statement("bad", "select * from t");
        assert!(matches!(
            CommandTemplate::from_op(&raw, &BindingCompiler::default()),
            Err(TemplateError::Params { .. })
        ));
    }
}
