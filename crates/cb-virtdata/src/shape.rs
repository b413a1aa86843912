//! Call shapes
//!
//! Every generator function takes one input and produces one output. The
//! kind of each side is drawn from the closed set [`Kind`], so the set of
//! call shapes is the finite product `Kind x Kind`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a function input or output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// 64-bit signed integer, the kind of a cycle number
    Long,
    /// 32-bit signed integer
    Int,
    /// 64-bit float
    Double,
    /// Owned text
    Text,
    /// Any tagged [`Value`](crate::Value)
    Value,
}

impl Kind {
    /// All kinds
    pub const ALL: [Kind; 5] = [Kind::Long, Kind::Int, Kind::Double, Kind::Text, Kind::Value];

    /// Lowercase name
    #[inline]
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Kind::Long => "long",
            Kind::Int => "int",
            Kind::Double => "double",
            Kind::Text => "text",
            Kind::Value => "value",
        }
    }

    /// Numeric kinds
    #[inline]
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Kind::Long | Kind::Int | Kind::Double)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Input and output kind of a function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    /// Input kind
    pub input: Kind,
    /// Output kind
    pub output: Kind,
}

impl Shape {
    /// Create a shape
    #[inline]
    #[must_use]
    pub const fn new(input: Kind, output: Kind) -> Self {
        Self { input, output }
    }

    /// Whether a function of this shape can stand in for `want` as is
    ///
    /// Inputs must match exactly. Any output satisfies a `Value` output,
    /// since the caller receives a tagged value either way.
    #[inline]
    #[must_use]
    pub fn satisfies(self, want: Shape) -> bool {
        self.input == want.input && (self.output == want.output || want.output == Kind::Value)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.input, self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_display() {
        assert_eq!(Shape::new(Kind::Long, Kind::Int).to_string(), "long->int");
    }

    #[test]
    fn shape_satisfies_value_output() {
        let long_int = Shape::new(Kind::Long, Kind::Int);
        assert!(long_int.satisfies(Shape::new(Kind::Long, Kind::Value)));
        assert!(long_int.satisfies(long_int));
        assert!(!long_int.satisfies(Shape::new(Kind::Long, Kind::Long)));
        assert!(!long_int.satisfies(Shape::new(Kind::Int, Kind::Value)));
    }
}
