//! Error types for cb-templating
//!
//! - [`TemplateError`]: raised while parsing an op template, before any
//!   cycle runs
//! - [`OpConfigError`]: raised by accessors on a resolved template
//! - [`ParamsError`]: malformed `k=v;k=v` parameter text

use cb_virtdata::{BindingError, FuncError, ValueError};

/// Failure while parsing or compiling an op template
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TemplateError {
    /// `{name}` refers to a binding that is not declared
    #[error("op '{op}' field '{field}': unresolvable bind point '{anchor}'")]
    UnresolvedBindPoint {
        /// Op template name
        op: String,
        /// Field holding the bind point
        field: String,
        /// Anchor that has no recipe
        anchor: String,
    },

    /// A bind point's recipe failed to compile
    #[error("op '{op}' field '{field}': binding '{anchor}' failed: {source}")]
    Binding {
        /// Op template name
        op: String,
        /// Field holding the bind point
        field: String,
        /// Anchor of the failing bind point
        anchor: String,
        /// Compiler failure
        source: BindingError,
    },

    /// A structure that looks like an unquoted bind point
    #[error(
        "op '{op}' field '{field}': '{{{key}}}' was read as a map; quote bind points, for example \"{{{key}}}\""
    )]
    AmbiguousBindPoint {
        /// Op template name
        op: String,
        /// Field holding the structure
        field: String,
        /// Map key that looked like an anchor
        key: String,
    },

    /// Parameter text could not be parsed
    #[error("op '{op}': {source}")]
    Params {
        /// Op template name
        op: String,
        /// Parse failure
        source: ParamsError,
    },

    /// The op template itself is malformed
    #[error("op '{op}': {message}")]
    Invalid {
        /// Op template name
        op: String,
        /// What is wrong
        message: String,
    },
}

impl TemplateError {
    /// Create an invalid-template error
    #[must_use]
    pub fn invalid(op: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            op: op.to_string(),
            message: message.into(),
        }
    }

    /// Op template the error belongs to
    #[must_use]
    pub fn op(&self) -> &str {
        match self {
            Self::UnresolvedBindPoint { op, .. }
            | Self::Binding { op, .. }
            | Self::AmbiguousBindPoint { op, .. }
            | Self::Params { op, .. }
            | Self::Invalid { op, .. } => op,
        }
    }
}

/// Failure while reading a field from a resolved template
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OpConfigError {
    /// Field is defined at no tier
    #[error("op '{op}' requires field '{field}', but it is not defined in op fields, op params or activity params")]
    MissingField {
        /// Op template name
        op: String,
        /// Missing field
        field: String,
    },

    /// A configuration tier holds a per-cycle value
    #[error("op '{op}' field '{field}' is dynamic in {tier}; configuration values must be static")]
    DynamicConfig {
        /// Op template name
        op: String,
        /// Field name
        field: String,
        /// Tier where the dynamic value was found
        tier: &'static str,
    },

    /// A static value was required but the op field is dynamic
    #[error("op '{op}' field '{field}' must be static, but it is bound per cycle")]
    StaticRequired {
        /// Op template name
        op: String,
        /// Field name
        field: String,
    },

    /// Value present but not castable
    #[error("op '{op}' field '{field}' cannot be read: {source}")]
    Cast {
        /// Op template name
        op: String,
        /// Field name
        field: String,
        /// Conversion failure
        source: ValueError,
    },

    /// Evaluating a dynamic field failed for a cycle
    #[error("op '{op}' field '{field}' failed at cycle {cycle}: {source}")]
    Eval {
        /// Op template name
        op: String,
        /// Field name
        field: String,
        /// Cycle being evaluated
        cycle: i64,
        /// Function failure
        source: FuncError,
    },

    /// Value does not name a known variant
    #[error("op '{op}' field '{field}': '{value}' is not one of {expected}")]
    InvalidEnum {
        /// Op template name
        op: String,
        /// Field name
        field: String,
        /// Offending value
        value: String,
        /// Accepted values
        expected: String,
    },
}

impl OpConfigError {
    /// Whether the field was simply absent
    #[inline]
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::MissingField { .. })
    }
}

/// Malformed parameter text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamsError {
    /// Segment without `=`
    #[error("parameter '{segment}' is not of the form name=value")]
    MissingEquals {
        /// Offending segment
        segment: String,
    },

    /// Empty parameter name
    #[error("parameter name is empty in '{segment}'")]
    EmptyName {
        /// Offending segment
        segment: String,
    },

    /// Quote never closed
    #[error("unterminated quote in '{text}'")]
    UnterminatedQuote {
        /// Full text
        text: String,
    },
}
