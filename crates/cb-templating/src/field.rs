//! Field classification
//!
//! Every op field is either static, with a value fixed for the whole run,
//! or dynamic, with a value computed from the cycle number. Nested maps and
//! lists are dynamic when any element at any depth is.
//!
//! # Critical Invariant
//!
//! A dynamic field reproduces the nesting of its raw value exactly. Only
//! the positions holding bind points change from cycle to cycle.

use crate::bind_points::{is_anchor, CapturePoint};
use crate::error::TemplateError;
use crate::parsed_template::{ParsedTemplate, TemplateKind};
use cb_virtdata::{BindingCompiler, CompiledBinding, FuncError, Kind, Value};
use indexmap::IndexMap;

/// A field after classification
#[derive(Debug, Clone)]
pub enum FieldTemplate {
    /// Same value on every cycle
    Static(Value),
    /// Value computed per cycle
    Dynamic(DynamicField),
}

impl FieldTemplate {
    /// Whether the field depends on the cycle
    #[inline]
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic(_))
    }

    /// Evaluate for one cycle
    ///
    /// # Errors
    /// Returns [`FuncError`] if a binding fails.
    pub fn apply(&self, cycle: i64) -> Result<Value, FuncError> {
        match self {
            Self::Static(value) => Ok(value.clone()),
            Self::Dynamic(field) => field.apply(cycle),
        }
    }
}

/// A field whose value depends on the cycle
#[derive(Debug, Clone)]
pub enum DynamicField {
    /// One bind point filling the whole value, native output kept
    Raw(CompiledBinding),
    /// Literal text with bind points rendered in between
    Concat(ConcatTemplate),
    /// A list holding at least one dynamic element
    List(Vec<FieldTemplate>),
    /// A map holding at least one dynamic entry
    Map(IndexMap<String, FieldTemplate>),
}

impl DynamicField {
    /// Evaluate for one cycle
    ///
    /// # Errors
    /// Returns [`FuncError`] if a binding fails.
    pub fn apply(&self, cycle: i64) -> Result<Value, FuncError> {
        match self {
            Self::Raw(binding) => binding.apply(cycle),
            Self::Concat(concat) => concat.apply(cycle).map(Value::Text),
            Self::List(items) => items
                .iter()
                .map(|item| item.apply(cycle))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Self::Map(entries) => entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), v.apply(cycle)?)))
                .collect::<Result<IndexMap<_, _>, FuncError>>()
                .map(Value::Map),
        }
    }
}

/// Literal fragments interleaved with text-producing bindings
///
/// `literals` always holds one more element than `slots`. Each slot
/// indexes `bindings`, which holds one binding per distinct anchor.
#[derive(Debug, Clone)]
pub struct ConcatTemplate {
    literals: Vec<String>,
    bindings: Vec<CompiledBinding>,
    slots: Vec<usize>,
    capacity: usize,
}

impl ConcatTemplate {
    /// Render one cycle into a new string
    ///
    /// # Errors
    /// Returns [`FuncError`] if a binding fails.
    pub fn apply(&self, cycle: i64) -> Result<String, FuncError> {
        let mut buf = String::with_capacity(self.capacity);
        self.apply_into(cycle, &mut buf)?;
        Ok(buf)
    }

    /// Append one cycle's rendering to `buf`
    ///
    /// # Errors
    /// Returns [`FuncError`] if a binding fails.
    pub fn apply_into(&self, cycle: i64, buf: &mut String) -> Result<(), FuncError> {
        for (literal, &slot) in self.literals.iter().zip(&self.slots) {
            buf.push_str(literal);
            if let Some(binding) = self.bindings.get(slot) {
                binding.apply_text(cycle, buf)?;
            }
        }
        if let Some(last) = self.literals.last() {
            buf.push_str(last);
        }
        Ok(())
    }

    /// Number of distinct bindings
    #[inline]
    #[must_use]
    pub fn arity(&self) -> usize {
        self.bindings.len()
    }
}

/// Classifies raw field values for one op
pub struct FieldParser<'a> {
    op: &'a str,
    bindings: &'a IndexMap<String, String>,
    compiler: &'a BindingCompiler,
    captures: Vec<CapturePoint>,
}

impl<'a> FieldParser<'a> {
    /// Create a parser for the op named `op`
    #[must_use]
    pub fn new(
        op: &'a str,
        bindings: &'a IndexMap<String, String>,
        compiler: &'a BindingCompiler,
    ) -> Self {
        Self {
            op,
            bindings,
            compiler,
            captures: Vec::new(),
        }
    }

    /// Capture points found so far
    #[must_use]
    pub fn into_captures(self) -> Vec<CapturePoint> {
        self.captures
    }

    /// Classify `value`, compiling any bind points it holds
    ///
    /// # Errors
    /// Returns [`TemplateError`] for unresolved anchors, recipes that fail
    /// to compile, and map structures that look like unquoted bind points.
    pub fn parse(&mut self, field: &str, value: &Value) -> Result<FieldTemplate, TemplateError> {
        match value {
            Value::Text(text) => self.parse_text(field, text),
            Value::List(items) => {
                let parsed = items
                    .iter()
                    .map(|item| self.parse(field, item))
                    .collect::<Result<Vec<_>, _>>()?;
                if parsed.iter().any(FieldTemplate::is_dynamic) {
                    Ok(FieldTemplate::Dynamic(DynamicField::List(parsed)))
                } else {
                    Ok(FieldTemplate::Static(Value::List(
                        parsed.into_iter().map(into_static).collect(),
                    )))
                }
            }
            Value::Map(entries) => {
                self.check_ambiguous(field, entries)?;
                let mut parsed = IndexMap::with_capacity(entries.len());
                for (key, entry) in entries {
                    parsed.insert(key.clone(), self.parse(field, entry)?);
                }
                if parsed.values().any(FieldTemplate::is_dynamic) {
                    Ok(FieldTemplate::Dynamic(DynamicField::Map(parsed)))
                } else {
                    Ok(FieldTemplate::Static(Value::Map(
                        parsed.into_iter().map(|(k, v)| (k, into_static(v))).collect(),
                    )))
                }
            }
            other => Ok(FieldTemplate::Static(other.clone())),
        }
    }

    fn parse_text(&mut self, field: &str, text: &str) -> Result<FieldTemplate, TemplateError> {
        let template = ParsedTemplate::parse(text, self.bindings);
        self.captures.extend_from_slice(template.captures());

        if let Some(anchor) = template.missing().first() {
            return Err(TemplateError::UnresolvedBindPoint {
                op: self.op.to_string(),
                field: field.to_string(),
                anchor: (*anchor).to_string(),
            });
        }

        match template.kind() {
            TemplateKind::Literal => Ok(FieldTemplate::Static(Value::Text(
                template.literals().collect(),
            ))),
            TemplateKind::BindRef => {
                let point = &template.bind_points()[0];
                let binding = self.compile(field, &point.anchor, &point.recipe, Kind::Value)?;
                Ok(FieldTemplate::Dynamic(DynamicField::Raw(binding)))
            }
            TemplateKind::Concat => {
                let bindings = template
                    .bind_points()
                    .iter()
                    .map(|p| self.compile(field, &p.anchor, &p.recipe, Kind::Text))
                    .collect::<Result<Vec<_>, _>>()?;
                let literals: Vec<String> = template.literals().map(str::to_string).collect();
                let slots = template.slots().to_vec();
                let capacity = literals.iter().map(String::len).sum::<usize>() + 16 * slots.len();
                Ok(FieldTemplate::Dynamic(DynamicField::Concat(ConcatTemplate {
                    literals,
                    bindings,
                    slots,
                    capacity,
                })))
            }
        }
    }

    fn compile(
        &self,
        field: &str,
        anchor: &str,
        recipe: &str,
        output: Kind,
    ) -> Result<CompiledBinding, TemplateError> {
        self.compiler
            .compile(recipe, output)
            .map_err(|source| TemplateError::Binding {
                op: self.op.to_string(),
                field: field.to_string(),
                anchor: anchor.to_string(),
                source,
            })
    }

    /// `key: "{name}"` written without quotes reads back as `{name: null}`
    fn check_ambiguous(
        &self,
        field: &str,
        entries: &IndexMap<String, Value>,
    ) -> Result<(), TemplateError> {
        let ambiguous = |key: &str| TemplateError::AmbiguousBindPoint {
            op: self.op.to_string(),
            field: field.to_string(),
            key: key.trim_matches(|c| c == '{' || c == '}').to_string(),
        };
        if entries.len() == 1 {
            if let Some(key) = entries.keys().next().filter(|k| k.starts_with('{')) {
                return Err(ambiguous(key));
            }
        }
        let all_null_anchors = !entries.is_empty()
            && entries.iter().all(|(k, v)| v.is_null() && is_anchor(k));
        match entries.keys().next() {
            Some(key) if all_null_anchors => Err(ambiguous(key)),
            _ => Ok(()),
        }
    }
}

fn into_static(field: FieldTemplate) -> Value {
    match field {
        FieldTemplate::Static(value) => value,
        FieldTemplate::Dynamic(_) => Value::Null,
    }
}

/// Whether `value` holds a bind point at any depth
#[must_use]
pub fn holds_bind_point(value: &Value) -> bool {
    match value {
        Value::Text(text) => !crate::bind_points::scan(text).points.is_empty(),
        Value::List(items) => items.iter().any(holds_bind_point),
        Value::Map(entries) => entries.values().any(holds_bind_point),
        _ => false,
    }
}
