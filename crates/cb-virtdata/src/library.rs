//! Generator library
//!
//! The closed registry of generator constructors. Each entry declares its
//! call shape and builds a pure [`Func`] from literal arguments.
//!
//! # Critical Invariant
//!
//! Every generator is a pure function of its input. Anything expensive is
//! built once at construction time and shared read-only, so the same
//! input yields the same output on any thread.

use crate::adapter::AdapterTable;
use crate::error::{BindingError, FuncError};
use crate::func::{FnOf, Func, Out};
use crate::recipe::{Arg, Call};
use crate::shape::{Kind, Shape};
use crate::value::Value;
use indexmap::IndexMap;

/// Largest size accepted by sized generators such as `ListOf` and `AlphaNumeric`
pub const MAX_GENERATED_SIZE: i64 = 65_536;

/// Builds a function from a parsed call
pub type Constructor = fn(&Args<'_>) -> Result<Func, BindingError>;

/// Registry entry for one generator
#[derive(Debug, Clone, Copy)]
pub struct GeneratorSpec {
    /// Constructor name as written in recipes
    pub name: &'static str,
    /// Declared call shape
    pub shape: Shape,
    /// Argument summary shown in diagnostics
    pub signature: &'static str,
    constructor: Constructor,
}

impl GeneratorSpec {
    /// Create a registry entry
    #[must_use]
    pub const fn new(
        name: &'static str,
        shape: Shape,
        signature: &'static str,
        constructor: Constructor,
    ) -> Self {
        Self {
            name,
            shape,
            signature,
            constructor,
        }
    }
}

/// Arguments of one call, with typed accessors
pub struct Args<'a> {
    call: &'a Call,
    library: &'a GeneratorLibrary,
}

impl<'a> Args<'a> {
    /// Constructor name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.call.name
    }

    /// Number of arguments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.call.args.len()
    }

    /// Whether there are no arguments
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.call.args.is_empty()
    }

    /// Require an argument count within `min..=max`
    ///
    /// # Errors
    /// Returns [`BindingError::Arity`] otherwise.
    pub fn expect(&self, min: usize, max: usize) -> Result<(), BindingError> {
        let found = self.len();
        if (min..=max).contains(&found) {
            return Ok(());
        }
        let expected = if min == max {
            min.to_string()
        } else if max == usize::MAX {
            format!("{min} or more")
        } else {
            format!("{min}..{max}")
        };
        Err(BindingError::Arity {
            name: self.call.name.clone(),
            expected,
            found,
        })
    }

    fn arg(&self, index: usize) -> Result<&'a Arg, BindingError> {
        self.call.args.get(index).ok_or_else(|| BindingError::Arity {
            name: self.call.name.clone(),
            expected: format!("at least {}", index + 1),
            found: self.len(),
        })
    }

    fn arg_type(&self, index: usize, expected: &'static str) -> BindingError {
        BindingError::ArgType {
            name: self.call.name.clone(),
            index,
            expected,
        }
    }

    /// Integer argument
    ///
    /// # Errors
    /// Returns [`BindingError::ArgType`] if the argument is not an integer.
    pub fn long(&self, index: usize) -> Result<i64, BindingError> {
        match self.arg(index)? {
            Arg::Long(v) => Ok(*v),
            _ => Err(self.arg_type(index, "an integer")),
        }
    }

    /// Size argument within `0..=MAX_GENERATED_SIZE`
    ///
    /// # Errors
    /// Returns [`BindingError::ArgType`] if the argument is not an integer
    /// and [`BindingError::InvalidArgument`] if it is out of range.
    pub fn size(&self, index: usize) -> Result<i64, BindingError> {
        let size = self.long(index)?;
        if !(0..=MAX_GENERATED_SIZE).contains(&size) {
            return Err(BindingError::invalid(
                self.name(),
                format!("size {size} is outside 0..={MAX_GENERATED_SIZE}"),
            ));
        }
        Ok(size)
    }

    /// Numeric argument, integers are widened
    ///
    /// # Errors
    /// Returns [`BindingError::ArgType`] if the argument is not numeric.
    #[allow(clippy::cast_precision_loss)]
    pub fn double(&self, index: usize) -> Result<f64, BindingError> {
        match self.arg(index)? {
            Arg::Double(v) => Ok(*v),
            Arg::Long(v) => Ok(*v as f64),
            _ => Err(self.arg_type(index, "a number")),
        }
    }

    /// String argument
    ///
    /// # Errors
    /// Returns [`BindingError::ArgType`] if the argument is not a string.
    pub fn text(&self, index: usize) -> Result<&'a str, BindingError> {
        match self.arg(index)? {
            Arg::Text(s) => Ok(s),
            _ => Err(self.arg_type(index, "a string")),
        }
    }

    /// Any literal argument as a tagged value
    ///
    /// # Errors
    /// Returns [`BindingError::ArgType`] if the argument is a nested call.
    pub fn literal(&self, index: usize) -> Result<Value, BindingError> {
        match self.arg(index)? {
            Arg::Long(v) => Ok(Value::Long(*v)),
            Arg::Double(v) => Ok(Value::Double(*v)),
            Arg::Text(s) => Ok(Value::Text(s.clone())),
            Arg::Bool(b) => Ok(Value::Bool(*b)),
            Arg::Call(_) => Err(self.arg_type(index, "a literal")),
        }
    }

    /// Nested call argument, instantiated and adapted to `long -> kind`
    ///
    /// # Errors
    /// Returns [`BindingError`] if the argument is not a call, or the call
    /// cannot be built or adapted.
    pub fn function(&self, index: usize, kind: Kind) -> Result<Out<i64>, BindingError> {
        let Arg::Call(call) = self.arg(index)? else {
            return Err(self.arg_type(index, "a function"));
        };
        let func = self.library.instantiate(call)?;
        let adapted = AdapterTable::global()
            .adapt_exact(func, Shape::new(Kind::Long, kind))
            .map_err(|source| BindingError::Adapt {
                recipe: call.to_string(),
                stage: 0,
                source,
            })?;
        adapted
            .into_long_input()
            .ok_or_else(|| self.arg_type(index, "a function of a long"))
    }
}

/// Registry of generator constructors
#[derive(Debug, Clone, Default)]
pub struct GeneratorLibrary {
    generators: IndexMap<&'static str, GeneratorSpec>,
}

impl GeneratorLibrary {
    /// Create an empty library
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a library holding every built-in generator
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut library = Self::new();
        for spec in builtins::ALL {
            library.register(*spec);
        }
        library
    }

    /// Register a generator, replacing any entry of the same name
    pub fn register(&mut self, spec: GeneratorSpec) {
        if self.generators.insert(spec.name, spec).is_some() {
            tracing::debug!(name = spec.name, "replaced generator registration");
        }
    }

    /// Look up a generator
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&GeneratorSpec> {
        self.generators.get(name)
    }

    /// Registered names in registration order
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.generators.keys().copied()
    }

    /// Number of registered generators
    #[must_use]
    pub fn len(&self) -> usize {
        self.generators.len()
    }

    /// Whether the library is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    /// Build the function for one call
    ///
    /// # Errors
    /// Returns [`BindingError::UnknownGenerator`] for unknown names, or
    /// whatever the constructor reports for bad arguments.
    pub fn instantiate(&self, call: &Call) -> Result<Func, BindingError> {
        let spec = self
            .generators
            .get(call.name.as_str())
            .ok_or_else(|| BindingError::UnknownGenerator {
                name: call.name.clone(),
            })?;
        let func = (spec.constructor)(&Args {
            call,
            library: self,
        })?;
        debug_assert_eq!(func.shape(), spec.shape, "{} declared a different shape", spec.name);
        Ok(func)
    }
}

/// Render outputs from several long functions into one buffer
fn render_into(out: &Out<i64>, input: i64, buf: &mut String) -> Result<(), FuncError> {
    match out {
        Out::Text(f) => buf.push_str(&f(input)?),
        other => buf.push_str(&other.call_value(input)?.to_string()),
    }
    Ok(())
}

#[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
fn mix(v: i64) -> i64 {
    let mut z = (v as u64).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    ((z ^ (z >> 31)) & (i64::MAX as u64)) as i64
}

mod builtins {
    use super::{mix, render_into, Args, FnOf, Func, GeneratorSpec, Out};
    use crate::adapter::narrow_long_to_int;
    use crate::error::BindingError;
    use crate::shape::{Kind, Shape};
    use crate::value::Value;
    use indexmap::IndexMap;
    use std::sync::Arc;

    const LONG_LONG: Shape = Shape::new(Kind::Long, Kind::Long);
    const LONG_TEXT: Shape = Shape::new(Kind::Long, Kind::Text);
    const LONG_VALUE: Shape = Shape::new(Kind::Long, Kind::Value);
    const TEXT_TEXT: Shape = Shape::new(Kind::Text, Kind::Text);

    pub(super) const ALL: &[GeneratorSpec] = &[
        GeneratorSpec::new("Identity", LONG_LONG, "()", identity),
        GeneratorSpec::new("Mod", LONG_LONG, "(modulo)", modulo),
        GeneratorSpec::new("Add", LONG_LONG, "(addend)", add),
        GeneratorSpec::new("Mul", LONG_LONG, "(factor)", mul),
        GeneratorSpec::new("Div", LONG_LONG, "(divisor)", div),
        GeneratorSpec::new("Clamp", LONG_LONG, "(min, max)", clamp),
        GeneratorSpec::new("Hash", LONG_LONG, "()", hash),
        GeneratorSpec::new("HashRange", LONG_LONG, "(min, max)", hash_range),
        GeneratorSpec::new("FixedValue", LONG_LONG, "(value)", fixed_value),
        GeneratorSpec::new("ToDouble", Shape::new(Kind::Long, Kind::Double), "()", to_double),
        GeneratorSpec::new("Scale", Shape::new(Kind::Long, Kind::Double), "(factor)", scale),
        GeneratorSpec::new("ToInt", Shape::new(Kind::Long, Kind::Int), "()", to_int),
        GeneratorSpec::new("ToString", Shape::new(Kind::Value, Kind::Text), "()", to_string),
        GeneratorSpec::new("Prefix", TEXT_TEXT, "(prefix)", prefix),
        GeneratorSpec::new("Suffix", TEXT_TEXT, "(suffix)", suffix),
        GeneratorSpec::new("Upper", TEXT_TEXT, "()", upper),
        GeneratorSpec::new("AlphaNumeric", LONG_TEXT, "(length)", alpha_numeric),
        GeneratorSpec::new("Constant", LONG_VALUE, "(literal)", constant),
        GeneratorSpec::new("Template", LONG_TEXT, "(pattern, func...)", template),
        GeneratorSpec::new("ListOf", LONG_VALUE, "(size, func)", list_of),
        GeneratorSpec::new("MapOf", LONG_VALUE, "(size, key_func, value_func)", map_of),
    ];

    fn identity(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(0, 0)?;
        Ok(Func::new(|v: i64| v))
    }

    fn modulo(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(1, 1)?;
        let m = args.long(0)?;
        if m == 0 {
            return Err(BindingError::invalid(args.name(), "modulo must not be zero"));
        }
        Ok(Func::new(move |v: i64| v.wrapping_rem(m)))
    }

    fn add(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(1, 1)?;
        let n = args.long(0)?;
        Ok(Func::new(move |v: i64| v.wrapping_add(n)))
    }

    fn mul(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(1, 1)?;
        let n = args.long(0)?;
        Ok(Func::new(move |v: i64| v.wrapping_mul(n)))
    }

    fn div(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(1, 1)?;
        let d = args.long(0)?;
        if d == 0 {
            return Err(BindingError::invalid(args.name(), "divisor must not be zero"));
        }
        Ok(Func::new(move |v: i64| v.wrapping_div(d)))
    }

    fn clamp(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(2, 2)?;
        let (min, max) = (args.long(0)?, args.long(1)?);
        if min > max {
            return Err(BindingError::invalid(args.name(), "min must not exceed max"));
        }
        Ok(Func::new(move |v: i64| v.clamp(min, max)))
    }

    fn hash(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(0, 0)?;
        Ok(Func::new(mix))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn hash_range(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(2, 2)?;
        let (min, max) = (args.long(0)?, args.long(1)?);
        if min > max {
            return Err(BindingError::invalid(args.name(), "min must not exceed max"));
        }
        let width = i128::from(max) - i128::from(min) + 1;
        Ok(Func::new(move |v: i64| {
            (i128::from(min) + i128::from(mix(v)) % width) as i64
        }))
    }

    fn fixed_value(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(1, 1)?;
        let n = args.long(0)?;
        Ok(Func::new(move |_: i64| n))
    }

    #[allow(clippy::cast_precision_loss)]
    fn to_double(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(0, 0)?;
        Ok(Func::new(|v: i64| v as f64))
    }

    #[allow(clippy::cast_precision_loss)]
    fn scale(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(1, 1)?;
        let factor = args.double(0)?;
        Ok(Func::new(move |v: i64| v as f64 * factor))
    }

    fn to_int(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(0, 0)?;
        Ok(Func::new(narrow_long_to_int))
    }

    fn to_string(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(0, 0)?;
        Ok(Func::new(|v: Value| v.to_string()))
    }

    fn prefix(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(1, 1)?;
        let head = args.text(0)?.to_string();
        Ok(Func::new(move |s: String| format!("{head}{s}")))
    }

    fn suffix(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(1, 1)?;
        let tail = args.text(0)?.to_string();
        Ok(Func::new(move |mut s: String| {
            s.push_str(&tail);
            s
        }))
    }

    fn upper(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(0, 0)?;
        Ok(Func::new(|s: String| s.to_uppercase()))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn alpha_numeric(args: &Args<'_>) -> Result<Func, BindingError> {
        const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
        args.expect(1, 1)?;
        let len = usize::try_from(args.size(0)?)
            .map_err(|_| BindingError::invalid(args.name(), "length must not be negative"))?;
        let alphabet: Arc<[char]> = ALPHABET.iter().map(|b| char::from(*b)).collect();
        Ok(Func::new(move |v: i64| {
            let mut state = v;
            let mut out = String::with_capacity(len);
            for _ in 0..len {
                state = mix(state);
                out.push(alphabet[(state as u64 % alphabet.len() as u64) as usize]);
            }
            out
        }))
    }

    fn constant(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(1, 1)?;
        let literal = args.literal(0)?;
        Ok(Func::new(move |_: i64| literal.clone()))
    }

    fn template(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(1, usize::MAX)?;
        let pattern = args.text(0)?;
        let fragments: Arc<[String]> = pattern.split("{}").map(str::to_string).collect();
        if fragments.len() != args.len() {
            return Err(BindingError::invalid(
                args.name(),
                format!(
                    "pattern has {} placeholder(s) but {} function(s) were given",
                    fragments.len() - 1,
                    args.len() - 1
                ),
            ));
        }
        let parts: Arc<[Out<i64>]> = (1..args.len())
            .map(|i| args.function(i, Kind::Text))
            .collect::<Result<_, _>>()?;
        let body: FnOf<i64, String> = Arc::new(move |v: i64| {
            let mut buf = String::new();
            for (fragment, part) in fragments.iter().zip(parts.iter()) {
                buf.push_str(fragment);
                render_into(part, v, &mut buf)?;
            }
            if let Some(last) = fragments.last() {
                buf.push_str(last);
            }
            Ok(buf)
        });
        Ok(Func::Long(Out::Text(body)))
    }

    fn list_of(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(2, 2)?;
        let size = args.size(0)?;
        let item = args.function(1, Kind::Value)?;
        let body: FnOf<i64, Value> = Arc::new(move |v: i64| {
            let base = v.wrapping_mul(size);
            (0..size)
                .map(|i| item.call_value(base.wrapping_add(i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
        });
        Ok(Func::Long(Out::Value(body)))
    }

    fn map_of(args: &Args<'_>) -> Result<Func, BindingError> {
        args.expect(3, 3)?;
        let size = args.size(0)?;
        let key = args.function(1, Kind::Text)?;
        let value = args.function(2, Kind::Value)?;
        let body: FnOf<i64, Value> = Arc::new(move |v: i64| {
            let base = v.wrapping_mul(size);
            let mut map = IndexMap::new();
            for i in 0..size {
                let input = base.wrapping_add(i);
                map.insert(key.call_value(input)?.to_string(), value.call_value(input)?);
            }
            Ok(Value::Map(map))
        });
        Ok(Func::Long(Out::Value(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::Recipe;

    fn build(text: &str) -> Result<Func, BindingError> {
        let recipe = Recipe::parse(text).unwrap();
        GeneratorLibrary::with_defaults().instantiate(&recipe.stages()[0])
    }

    #[test]
    fn library_with_defaults_registers_builtins() {
        let library = GeneratorLibrary::with_defaults();
        assert!(library.get("Mod").is_some());
        assert!(library.get("Template").is_some());
        assert!(library.get("Nope").is_none());
        assert_eq!(library.names().next(), Some("Identity"));
    }

    #[test]
    fn library_rejects_unknown_generator() {
        let err = build("Nope(1)").unwrap_err();
        assert_eq!(err, BindingError::UnknownGenerator { name: "Nope".into() });
    }

    #[test]
    fn library_checks_arity_and_types() {
        assert!(matches!(build("Mod()"), Err(BindingError::Arity { .. })));
        assert!(matches!(build("Mod(1, 2)"), Err(BindingError::Arity { .. })));
        assert!(matches!(
            build("Mod('x')"),
            Err(BindingError::ArgType { index: 0, .. })
        ));
        assert!(matches!(
            build("Mod(0)"),
            Err(BindingError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn builtins_declare_matching_shapes() {
        let library = GeneratorLibrary::with_defaults();
        let samples = [
            "Identity()", "Mod(3)", "Add(1)", "Mul(2)", "Div(2)", "Clamp(0, 9)", "Hash()",
            "HashRange(1, 5)", "FixedValue(7)", "ToDouble()", "Scale(0.5)", "ToInt()",
            "ToString()", "Prefix('a')", "Suffix('b')", "Upper()", "AlphaNumeric(4)",
            "Constant('c')", "Template('{}', Identity())", "ListOf(2, Identity())",
            "MapOf(2, ToString(), Identity())",
        ];
        for text in samples {
            let recipe = Recipe::parse(text).unwrap();
            let call = &recipe.stages()[0];
            let func = library.instantiate(call).unwrap();
            assert_eq!(func.shape(), library.get(&call.name).unwrap().shape, "{text}");
        }
    }

    #[test]
    fn hash_range_stays_in_bounds() {
        let f = build("HashRange(10, 20)").unwrap();
        for cycle in 0..500 {
            let v = f.call(Value::Long(cycle)).unwrap().as_i64().unwrap();
            assert!((10..=20).contains(&v));
        }
    }

    #[test]
    fn template_substitutes_in_order() {
        let f = build("Template('{}-{}', Identity(), Mod(2))").unwrap();
        assert_eq!(f.call(Value::Long(7)), Ok(Value::from("7-1")));
        assert!(matches!(
            build("Template('{}-{}', Identity())"),
            Err(BindingError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn alpha_numeric_is_deterministic() {
        let f = build("AlphaNumeric(12)").unwrap();
        let a = f.call(Value::Long(99)).unwrap();
        let b = f.call(Value::Long(99)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_text().map(str::len), Some(12));
    }

    #[test]
    fn list_and_map_builders() {
        let list = build("ListOf(3, Identity())").unwrap();
        assert_eq!(
            list.call(Value::Long(2)),
            Ok(Value::List(vec![Value::Long(6), Value::Long(7), Value::Long(8)]))
        );
        let map = build("MapOf(2, Prefix('k'), Identity())").unwrap();
        let Value::Map(entries) = map.call(Value::Long(1)).unwrap() else {
            panic!("expected a map");
        };
        assert_eq!(entries.get("k2"), Some(&Value::Long(2)));
        assert_eq!(entries.get("k3"), Some(&Value::Long(3)));
    }

    #[test]
    fn sizes_are_bounded() {
        for recipe in [
            "ListOf(4611686018427387904, Identity())",
            "MapOf(100000, ToString(), Identity())",
            "AlphaNumeric(1000000)",
            "ListOf(-1, Identity())",
        ] {
            assert!(
                matches!(build(recipe), Err(BindingError::InvalidArgument { .. })),
                "{recipe}"
            );
        }
        assert!(build(&format!("ListOf({MAX_GENERATED_SIZE}, Identity())")).is_ok());
    }
}
