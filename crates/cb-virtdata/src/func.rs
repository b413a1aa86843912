//! Shape-tagged generator functions
//!
//! A [`Func`] is a closure whose call shape is visible in its variant:
//! the outer variant names the input kind and the inner [`Out`] variant
//! names the output kind. Numeric shapes call straight through typed
//! closures, so a `long->long` chain never touches a [`Value`].
//!
//! Conversions between kinds live in [`Scalar::convert`]. Whether a given
//! conversion is allowed at all is decided by the
//! [`AdapterTable`](crate::adapter::AdapterTable) before any closure is built.

use crate::adapter::{floor_modulo_int, floor_modulo_long, narrow_long_to_int};
use crate::error::{AdaptError, FuncError};
use crate::shape::{Kind, Shape};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Shared closure from `I` to `O`
pub type FnOf<I, O> = Arc<dyn Fn(I) -> Result<O, FuncError> + Send + Sync>;

/// Rewrites every output variant of an [`Out`] with the same expression
macro_rules! each_out {
    ($out:expr, $g:ident => $body:expr) => {
        match $out {
            Out::Long($g) => Out::Long($body),
            Out::Int($g) => Out::Int($body),
            Out::Double($g) => Out::Double($body),
            Out::Text($g) => Out::Text($body),
            Out::Value($g) => Out::Value($body),
        }
    };
}

/// Rust types that back a [`Kind`]
pub trait Scalar: Sized + Send + Sync + 'static {
    /// Kind represented by this type
    const KIND: Kind;

    /// Lift into a tagged value
    fn into_value(self) -> Value;

    /// Convert a tagged value into this kind
    ///
    /// Narrowing numeric conversions reduce by modulo against the narrower
    /// type's maximum. Text is parsed as a decimal number.
    ///
    /// # Errors
    /// Returns [`FuncError`] for unparseable text or non-numeric values.
    fn convert(value: Value) -> Result<Self, FuncError>;

    /// Place a closure producing this kind into the matching [`Out`] variant
    fn output<I>(f: FnOf<I, Self>) -> Out<I>;

    /// Place functions taking this kind into the matching [`Func`] variant
    fn wrap(out: Out<Self>) -> Func;

    /// Take the functions out of a [`Func`] that takes this kind
    fn select(func: Func) -> Option<Out<Self>>;
}

fn parse_text<T: std::str::FromStr>(text: String, kind: Kind) -> Result<T, FuncError> {
    let parsed = text.trim().parse();
    parsed.map_err(|_| FuncError::parse(text, kind))
}

fn extract_error(kind: Kind, value: &Value) -> FuncError {
    FuncError::Extract {
        kind,
        found: value.type_name(),
    }
}

impl Scalar for i64 {
    const KIND: Kind = Kind::Long;

    fn into_value(self) -> Value {
        Value::Long(self)
    }

    fn convert(value: Value) -> Result<Self, FuncError> {
        match value {
            Value::Long(v) => Ok(v),
            Value::Int(v) => Ok(i64::from(v)),
            Value::Double(d) => Ok(floor_modulo_long(d)),
            Value::Text(s) => parse_text(s, Kind::Long),
            other => Err(extract_error(Kind::Long, &other)),
        }
    }

    fn output<I>(f: FnOf<I, Self>) -> Out<I> {
        Out::Long(f)
    }

    fn wrap(out: Out<Self>) -> Func {
        Func::Long(out)
    }

    fn select(func: Func) -> Option<Out<Self>> {
        match func {
            Func::Long(out) => Some(out),
            _ => None,
        }
    }
}

impl Scalar for i32 {
    const KIND: Kind = Kind::Int;

    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn convert(value: Value) -> Result<Self, FuncError> {
        match value {
            Value::Int(v) => Ok(v),
            Value::Long(v) => Ok(narrow_long_to_int(v)),
            Value::Double(d) => Ok(floor_modulo_int(d)),
            Value::Text(s) => parse_text(s, Kind::Int),
            other => Err(extract_error(Kind::Int, &other)),
        }
    }

    fn output<I>(f: FnOf<I, Self>) -> Out<I> {
        Out::Int(f)
    }

    fn wrap(out: Out<Self>) -> Func {
        Func::Int(out)
    }

    fn select(func: Func) -> Option<Out<Self>> {
        match func {
            Func::Int(out) => Some(out),
            _ => None,
        }
    }
}

impl Scalar for f64 {
    const KIND: Kind = Kind::Double;

    fn into_value(self) -> Value {
        Value::Double(self)
    }

    #[allow(clippy::cast_precision_loss)]
    fn convert(value: Value) -> Result<Self, FuncError> {
        match value {
            Value::Double(d) => Ok(d),
            Value::Long(v) => Ok(v as f64),
            Value::Int(v) => Ok(f64::from(v)),
            Value::Text(s) => parse_text(s, Kind::Double),
            other => Err(extract_error(Kind::Double, &other)),
        }
    }

    fn output<I>(f: FnOf<I, Self>) -> Out<I> {
        Out::Double(f)
    }

    fn wrap(out: Out<Self>) -> Func {
        Func::Double(out)
    }

    fn select(func: Func) -> Option<Out<Self>> {
        match func {
            Func::Double(out) => Some(out),
            _ => None,
        }
    }
}

impl Scalar for String {
    const KIND: Kind = Kind::Text;

    fn into_value(self) -> Value {
        Value::Text(self)
    }

    fn convert(value: Value) -> Result<Self, FuncError> {
        match value {
            Value::Text(s) => Ok(s),
            other => Ok(other.to_string()),
        }
    }

    fn output<I>(f: FnOf<I, Self>) -> Out<I> {
        Out::Text(f)
    }

    fn wrap(out: Out<Self>) -> Func {
        Func::Text(out)
    }

    fn select(func: Func) -> Option<Out<Self>> {
        match func {
            Func::Text(out) => Some(out),
            _ => None,
        }
    }
}

impl Scalar for Value {
    const KIND: Kind = Kind::Value;

    fn into_value(self) -> Value {
        self
    }

    fn convert(value: Value) -> Result<Self, FuncError> {
        Ok(value)
    }

    fn output<I>(f: FnOf<I, Self>) -> Out<I> {
        Out::Value(f)
    }

    fn wrap(out: Out<Self>) -> Func {
        Func::Value(out)
    }

    fn select(func: Func) -> Option<Out<Self>> {
        match func {
            Func::Value(out) => Some(out),
            _ => None,
        }
    }
}

/// Functions from `I`, tagged by output kind
pub enum Out<I> {
    /// `I -> long`
    Long(FnOf<I, i64>),
    /// `I -> int`
    Int(FnOf<I, i32>),
    /// `I -> double`
    Double(FnOf<I, f64>),
    /// `I -> text`
    Text(FnOf<I, String>),
    /// `I -> value`
    Value(FnOf<I, Value>),
}

impl<I> Clone for Out<I> {
    fn clone(&self) -> Self {
        match self {
            Out::Long(f) => Out::Long(Arc::clone(f)),
            Out::Int(f) => Out::Int(Arc::clone(f)),
            Out::Double(f) => Out::Double(Arc::clone(f)),
            Out::Text(f) => Out::Text(Arc::clone(f)),
            Out::Value(f) => Out::Value(Arc::clone(f)),
        }
    }
}

impl<I: Scalar> Out<I> {
    /// Output kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> Kind {
        match self {
            Out::Long(_) => Kind::Long,
            Out::Int(_) => Kind::Int,
            Out::Double(_) => Kind::Double,
            Out::Text(_) => Kind::Text,
            Out::Value(_) => Kind::Value,
        }
    }

    /// Call and lift the result into a tagged value
    ///
    /// # Errors
    /// Propagates the function's own failure.
    pub fn call_value(&self, input: I) -> Result<Value, FuncError> {
        match self {
            Out::Long(f) => f(input).map(Value::Long),
            Out::Int(f) => f(input).map(Value::Int),
            Out::Double(f) => f(input).map(Value::Double),
            Out::Text(f) => f(input).map(Value::Text),
            Out::Value(f) => f(input),
        }
    }

    fn accepting<J: Scalar>(self) -> Out<J> {
        each_out!(self, g => Arc::new(move |x: J| g(I::convert(x.into_value())?)))
    }

    fn producing(self, kind: Kind) -> Out<I> {
        if self.kind() == kind {
            return self;
        }
        match self {
            Out::Long(f) => retarget(f, kind),
            Out::Int(f) => retarget(f, kind),
            Out::Double(f) => retarget(f, kind),
            Out::Text(f) => retarget(f, kind),
            Out::Value(f) => retarget(f, kind),
        }
    }

    fn then(self, next: Func) -> Result<Out<I>, AdaptError> {
        match self {
            Out::Long(f) => chain(f, next),
            Out::Int(f) => chain(f, next),
            Out::Double(f) => chain(f, next),
            Out::Text(f) => chain(f, next),
            Out::Value(f) => chain(f, next),
        }
    }
}

fn retarget<I: Scalar, O: Scalar>(f: FnOf<I, O>, kind: Kind) -> Out<I> {
    match kind {
        Kind::Long => Out::Long(Arc::new(move |x| i64::convert(f(x)?.into_value()))),
        Kind::Int => Out::Int(Arc::new(move |x| i32::convert(f(x)?.into_value()))),
        Kind::Double => Out::Double(Arc::new(move |x| f64::convert(f(x)?.into_value()))),
        Kind::Text => Out::Text(Arc::new(move |x| String::convert(f(x)?.into_value()))),
        Kind::Value => Out::Value(Arc::new(move |x| Ok(f(x)?.into_value()))),
    }
}

fn chain<I: Scalar, M: Scalar>(f: FnOf<I, M>, next: Func) -> Result<Out<I>, AdaptError> {
    let input = next.shape().input;
    let g = M::select(next).ok_or(AdaptError::Mismatch {
        output: M::KIND,
        input,
    })?;
    Ok(each_out!(g, h => Arc::new(move |x: I| h(f(x)?))))
}

/// A generator function tagged by its call shape
pub enum Func {
    /// Takes a long
    Long(Out<i64>),
    /// Takes an int
    Int(Out<i32>),
    /// Takes a double
    Double(Out<f64>),
    /// Takes text
    Text(Out<String>),
    /// Takes any value
    Value(Out<Value>),
}

impl Clone for Func {
    fn clone(&self) -> Self {
        match self {
            Func::Long(out) => Func::Long(out.clone()),
            Func::Int(out) => Func::Int(out.clone()),
            Func::Double(out) => Func::Double(out.clone()),
            Func::Text(out) => Func::Text(out.clone()),
            Func::Value(out) => Func::Value(out.clone()),
        }
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Func").field("shape", &self.shape()).finish()
    }
}

impl Func {
    /// Wrap an infallible closure
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let modulo = Func::new(|v: i64| v % 5);
    /// assert_eq!(modulo.shape().to_string(), "long->long");
    /// ```
    pub fn new<I: Scalar, O: Scalar>(f: impl Fn(I) -> O + Send + Sync + 'static) -> Func {
        let body: FnOf<I, O> = Arc::new(move |x: I| -> Result<O, FuncError> { Ok(f(x)) });
        I::wrap(O::output(body))
    }

    /// Wrap a fallible closure
    pub fn fallible<I: Scalar, O: Scalar>(
        f: impl Fn(I) -> Result<O, FuncError> + Send + Sync + 'static,
    ) -> Func {
        let body: FnOf<I, O> = Arc::new(f);
        I::wrap(O::output(body))
    }

    /// Call shape
    #[must_use]
    pub fn shape(&self) -> Shape {
        match self {
            Func::Long(out) => Shape::new(Kind::Long, out.kind()),
            Func::Int(out) => Shape::new(Kind::Int, out.kind()),
            Func::Double(out) => Shape::new(Kind::Double, out.kind()),
            Func::Text(out) => Shape::new(Kind::Text, out.kind()),
            Func::Value(out) => Shape::new(Kind::Value, out.kind()),
        }
    }

    /// Evaluate with a tagged input, converting it to the input kind first
    ///
    /// This is the slow path used by diagnostics and tests. Compiled
    /// bindings call the typed closures directly.
    ///
    /// # Errors
    /// Returns [`FuncError`] if the input cannot be converted or the function fails.
    pub fn call(&self, input: Value) -> Result<Value, FuncError> {
        match self {
            Func::Long(out) => out.call_value(i64::convert(input)?),
            Func::Int(out) => out.call_value(i32::convert(input)?),
            Func::Double(out) => out.call_value(f64::convert(input)?),
            Func::Text(out) => out.call_value(String::convert(input)?),
            Func::Value(out) => out.call_value(input),
        }
    }

    /// Compose with `next`, whose input kind must equal this output kind
    ///
    /// # Errors
    /// Returns [`AdaptError::Mismatch`] when the kinds do not line up.
    pub fn then(self, next: Func) -> Result<Func, AdaptError> {
        Ok(match self {
            Func::Long(out) => Func::Long(out.then(next)?),
            Func::Int(out) => Func::Int(out.then(next)?),
            Func::Double(out) => Func::Double(out.then(next)?),
            Func::Text(out) => Func::Text(out.then(next)?),
            Func::Value(out) => Func::Value(out.then(next)?),
        })
    }

    /// Take the long-input functions, if this takes a long
    #[must_use]
    pub fn into_long_input(self) -> Option<Out<i64>> {
        i64::select(self)
    }

    pub(crate) fn with_input(self, kind: Kind) -> Func {
        if self.shape().input == kind {
            return self;
        }
        match kind {
            Kind::Long => Func::Long(self.accepting::<i64>()),
            Kind::Int => Func::Int(self.accepting::<i32>()),
            Kind::Double => Func::Double(self.accepting::<f64>()),
            Kind::Text => Func::Text(self.accepting::<String>()),
            Kind::Value => Func::Value(self.accepting::<Value>()),
        }
    }

    pub(crate) fn with_output(self, kind: Kind) -> Func {
        match self {
            Func::Long(out) => Func::Long(out.producing(kind)),
            Func::Int(out) => Func::Int(out.producing(kind)),
            Func::Double(out) => Func::Double(out.producing(kind)),
            Func::Text(out) => Func::Text(out.producing(kind)),
            Func::Value(out) => Func::Value(out.producing(kind)),
        }
    }

    fn accepting<J: Scalar>(self) -> Out<J> {
        match self {
            Func::Long(out) => out.accepting(),
            Func::Int(out) => out.accepting(),
            Func::Double(out) => out.accepting(),
            Func::Text(out) => out.accepting(),
            Func::Value(out) => out.accepting(),
        }
    }
}
