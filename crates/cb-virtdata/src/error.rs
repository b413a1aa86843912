//! Error types for cb-virtdata
//!
//! Errors are split by the phase in which they surface:
//! - [`RecipeError`]: recipe text could not be tokenized or parsed
//! - [`AdaptError`]: no conversion exists between two call shapes
//! - [`BindingError`]: a recipe could not be compiled into a binding
//! - [`FuncError`]: a compiled function failed while producing a value
//! - [`ValueError`]: a tagged value could not be read as the requested type
//!
//! Everything except [`FuncError`] is raised while compiling, before any
//! cycle is evaluated.

use crate::shape::{Kind, Shape};

/// Failure while evaluating a compiled function for one input
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FuncError {
    /// Text could not be parsed into a numeric kind
    #[error("cannot parse '{text}' as {kind}")]
    Parse {
        /// The offending text
        text: String,
        /// Requested kind
        kind: Kind,
    },

    /// A tagged value does not carry anything convertible to the kind
    #[error("cannot extract {kind} from a {found} value")]
    Extract {
        /// Requested kind
        kind: Kind,
        /// Type name of the value that was found
        found: &'static str,
    },

    /// A generator reported a failure of its own
    #[error("generator failed: {0}")]
    Generator(String),
}

impl FuncError {
    /// Create a parse error
    #[must_use]
    pub fn parse(text: impl Into<String>, kind: Kind) -> Self {
        Self::Parse {
            text: text.into(),
            kind,
        }
    }
}

/// Missing conversion between two call shapes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdaptError {
    /// The adapter table has no rule for a required kind pair
    #[error("no conversion from {from} to {to} while adapting {have} to {want}")]
    Unsupported {
        /// Kind a value must be converted from
        from: Kind,
        /// Kind a value must be converted to
        to: Kind,
        /// Shape of the function being adapted
        have: Shape,
        /// Shape requested by the caller
        want: Shape,
    },

    /// Two stages were chained whose kinds do not line up
    #[error("cannot feed {output} output into a stage taking {input}")]
    Mismatch {
        /// Output kind of the upstream stage
        output: Kind,
        /// Input kind of the downstream stage
        input: Kind,
    },
}

/// Recipe syntax error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecipeError {
    /// Recipe had no stages
    #[error("recipe is empty")]
    Empty,

    /// Text that is not a valid token
    #[error("invalid token '{text}' at offset {at}")]
    InvalidToken {
        /// Byte offset
        at: usize,
        /// Offending text
        text: String,
    },

    /// A token that the grammar does not allow here
    #[error("unexpected '{found}' at offset {at}, expected {expected}")]
    Unexpected {
        /// Byte offset
        at: usize,
        /// Offending token text
        found: String,
        /// What the parser was looking for
        expected: &'static str,
    },

    /// Input ended early, usually an unclosed parenthesis
    #[error("unexpected end of recipe, expected {expected}")]
    UnexpectedEnd {
        /// What the parser was looking for
        expected: &'static str,
    },
}

/// Recipe compilation error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindingError {
    /// Recipe text is malformed
    #[error("invalid recipe '{recipe}': {source}")]
    Recipe {
        /// Recipe text
        recipe: String,
        /// Syntax error
        source: RecipeError,
    },

    /// Constructor name is not in the generator library
    #[error("unknown generator '{name}'")]
    UnknownGenerator {
        /// Constructor name
        name: String,
    },

    /// Wrong number of arguments
    #[error("{name}: expected {expected} argument(s), found {found}")]
    Arity {
        /// Constructor name
        name: String,
        /// Accepted argument counts, for example `"1"` or `"2..4"`
        expected: String,
        /// Number of arguments supplied
        found: usize,
    },

    /// Argument has the wrong type
    #[error("{name}: argument {index} must be {expected}")]
    ArgType {
        /// Constructor name
        name: String,
        /// Zero-based argument index
        index: usize,
        /// Expected argument type
        expected: &'static str,
    },

    /// Argument has the right type but an unusable value
    #[error("{name}: {message}")]
    InvalidArgument {
        /// Constructor name
        name: String,
        /// Explanation
        message: String,
    },

    /// A stage could not be adapted to its neighbour
    #[error("cannot adapt stage {stage} of '{recipe}': {source}")]
    Adapt {
        /// Recipe text
        recipe: String,
        /// Zero-based stage index
        stage: usize,
        /// Adapter failure
        source: AdaptError,
    },
}

impl BindingError {
    /// Create an invalid argument error
    #[must_use]
    pub fn invalid(name: &str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

/// Tagged value could not be read as the requested type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    /// The value holds a different type
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        /// Requested type
        expected: &'static str,
        /// Type actually held
        found: &'static str,
    },

    /// Text could not be parsed as the requested type
    #[error("cannot parse '{text}' as {expected}")]
    Unparseable {
        /// Offending text
        text: String,
        /// Requested type
        expected: &'static str,
    },

    /// Numeric value does not fit the requested type
    #[error("{value} is out of range for {expected}")]
    OutOfRange {
        /// Rendered value
        value: String,
        /// Requested type
        expected: &'static str,
    },
}
