//! Function adapter
//!
//! Converts a [`Func`] from its native call shape to a required one. The
//! allowed kind-to-kind conversions are held in an [`AdapterTable`] that is
//! built once. Adapting checks both sides of the shape against the table
//! before wrapping, so an unsupported pair fails while compiling, never
//! while a cycle is being evaluated.
//!
//! # Narrowing
//!
//! Narrowing numeric conversions never saturate and never fail. The value
//! is reduced by modulo against the maximum of the narrower type:
//!
//! ```text
//! long   -> int   : v % i32::MAX
//! double -> long  : floor(v) % i64::MAX
//! double -> int   : floor(v) % i32::MAX
//! ```

use crate::error::AdaptError;
use crate::func::Func;
use crate::shape::{Kind, Shape};
use once_cell::sync::Lazy;
use std::collections::HashMap;

static STANDARD: Lazy<AdapterTable> = Lazy::new(AdapterTable::standard);

/// Reduce a long into int range by modulo against `i32::MAX`
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn narrow_long_to_int(v: i64) -> i32 {
    (v % i64::from(i32::MAX)) as i32
}

/// Floor a double and reduce it by modulo against `i64::MAX`
///
/// Non-finite inputs yield zero.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn floor_modulo_long(v: f64) -> i64 {
    (v.floor() % (i64::MAX as f64)) as i64
}

/// Floor a double and reduce it by modulo against `i32::MAX`
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn floor_modulo_int(v: f64) -> i32 {
    (v.floor() % f64::from(i32::MAX)) as i32
}

/// How a value of one kind becomes a value of another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conversion {
    /// Same kind
    Identity,
    /// Lossless or precision-only numeric widening
    Widen,
    /// Integer narrowing by modulo
    NarrowModulo,
    /// Float to integer by floor then modulo
    FloorModulo,
    /// Render to text
    Render,
    /// Parse text as a decimal number
    Parse,
    /// Lift into a tagged value
    Lift,
    /// Read a typed value back out of a tagged value
    Extract,
}

/// Pairwise kind conversion table
#[derive(Debug, Clone)]
pub struct AdapterTable {
    rules: HashMap<(Kind, Kind), Conversion>,
}

impl Default for AdapterTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl AdapterTable {
    /// The shared standard table
    #[must_use]
    pub fn global() -> &'static AdapterTable {
        &STANDARD
    }

    /// Build the standard table covering every kind pair
    #[must_use]
    pub fn standard() -> Self {
        let mut rules = HashMap::new();
        for from in Kind::ALL {
            for to in Kind::ALL {
                rules.insert((from, to), Self::standard_rule(from, to));
            }
        }
        Self { rules }
    }

    /// Build a table from explicit rules
    pub fn from_rules(rules: impl IntoIterator<Item = ((Kind, Kind), Conversion)>) -> Self {
        let mut rules: HashMap<_, _> = rules.into_iter().collect();
        for kind in Kind::ALL {
            rules.insert((kind, kind), Conversion::Identity);
        }
        Self { rules }
    }

    fn standard_rule(from: Kind, to: Kind) -> Conversion {
        use Kind::{Double, Int, Long, Text, Value};
        match (from, to) {
            (a, b) if a == b => Conversion::Identity,
            (Int, Long | Double) | (Long, Double) => Conversion::Widen,
            (Long, Int) => Conversion::NarrowModulo,
            (Double, Long | Int) => Conversion::FloorModulo,
            (_, Value) => Conversion::Lift,
            (_, Text) => Conversion::Render,
            (Text, _) => Conversion::Parse,
            _ => Conversion::Extract,
        }
    }

    /// Look up the conversion from one kind to another
    #[must_use]
    pub fn rule(&self, from: Kind, to: Kind) -> Option<Conversion> {
        self.rules.get(&(from, to)).copied()
    }

    /// Adapt `func` so it can be used where `want` is required
    ///
    /// A function whose shape already satisfies `want` is returned unchanged.
    /// Otherwise the input side converts the caller's argument into the
    /// function's native input, and the output side converts the native
    /// result into the requested output.
    ///
    /// # Errors
    /// Returns [`AdaptError::Unsupported`] naming the first missing kind pair.
    pub fn adapt(&self, func: Func, want: Shape) -> Result<Func, AdaptError> {
        let have = func.shape();
        if have.satisfies(want) {
            return Ok(func);
        }
        self.adapt_exact(func, want)
    }

    /// Adapt `func` to exactly `want`, lifting outputs into values if needed
    ///
    /// # Errors
    /// Returns [`AdaptError::Unsupported`] naming the first missing kind pair.
    pub fn adapt_exact(&self, func: Func, want: Shape) -> Result<Func, AdaptError> {
        let have = func.shape();
        if have == want {
            return Ok(func);
        }
        self.require(want.input, have.input, have, want)?;
        self.require(have.output, want.output, have, want)?;
        tracing::trace!(%have, %want, "adapting function");
        Ok(func.with_input(want.input).with_output(want.output))
    }

    fn require(&self, from: Kind, to: Kind, have: Shape, want: Shape) -> Result<Conversion, AdaptError> {
        self.rule(from, to).ok_or(AdaptError::Unsupported {
            from,
            to,
            have,
            want,
        })
    }
}

/// Adapt with the standard table
///
/// # Errors
/// Returns [`AdaptError`] if the standard table lacks a needed conversion.
pub fn adapt(func: Func, want: Shape) -> Result<Func, AdaptError> {
    AdapterTable::global().adapt(func, want)
}
