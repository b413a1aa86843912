//! Binding compiler
//!
//! Turns recipe text into a [`CompiledBinding`], a pure function from a
//! cycle number to a value. Every adaptation between stages happens here,
//! so evaluating a compiled binding never needs to look anything up.
//!
//! # Example
//!
//! ```rust,ignore
//! let compiler = BindingCompiler::default();
//! let binding = compiler.compile("Mod(5); ToString()", Kind::Value)?;
//! assert_eq!(binding.apply(7)?, Value::from("2"));
//! ```

use crate::adapter::AdapterTable;
use crate::error::{BindingError, FuncError};
use crate::func::{Func, Out};
use crate::library::GeneratorLibrary;
use crate::recipe::Recipe;
use crate::shape::{Kind, Shape};
use crate::value::Value;
use moka::sync::Cache;
use std::fmt::{self, Write as _};
use std::sync::Arc;

/// Default number of compiled bindings kept by a compiler
pub const DEFAULT_CACHE_CAPACITY: u64 = 1024;

struct Compiled {
    recipe: String,
    body: Out<i64>,
}

/// A compiled recipe, shareable across threads
///
/// Cloning is cheap and clones share the same compiled closures.
#[derive(Clone)]
pub struct CompiledBinding {
    inner: Arc<Compiled>,
}

impl fmt::Debug for CompiledBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledBinding")
            .field("recipe", &self.inner.recipe)
            .field("output", &self.output_kind())
            .finish()
    }
}

impl CompiledBinding {
    /// Recipe text this binding was compiled from
    #[inline]
    #[must_use]
    pub fn recipe(&self) -> &str {
        &self.inner.recipe
    }

    /// Native output kind
    #[inline]
    #[must_use]
    pub fn output_kind(&self) -> Kind {
        self.inner.body.kind()
    }

    /// Evaluate for one cycle
    ///
    /// # Errors
    /// Returns [`FuncError`] if a stage fails, for example when text that
    /// must be numeric does not parse.
    pub fn apply(&self, cycle: i64) -> Result<Value, FuncError> {
        self.inner.body.call_value(cycle)
    }

    /// Evaluate for one cycle and append the text form to `buf`
    ///
    /// # Errors
    /// Returns [`FuncError`] if a stage fails.
    pub fn apply_text(&self, cycle: i64, buf: &mut String) -> Result<(), FuncError> {
        let written = match &self.inner.body {
            Out::Long(f) => write!(buf, "{}", f(cycle)?),
            Out::Int(f) => write!(buf, "{}", f(cycle)?),
            Out::Double(f) => write!(buf, "{}", f(cycle)?),
            Out::Text(f) => {
                buf.push_str(&f(cycle)?);
                Ok(())
            }
            Out::Value(f) => write!(buf, "{}", f(cycle)?),
        };
        written.map_err(|_| FuncError::Generator("failed to render value".to_string()))
    }
}

/// Compiles recipes against a generator library
pub struct BindingCompiler {
    library: Arc<GeneratorLibrary>,
    adapters: &'static AdapterTable,
    cache: Cache<(String, Kind), CompiledBinding>,
}

impl fmt::Debug for BindingCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingCompiler")
            .field("generators", &self.library.len())
            .field("cached", &self.cache.entry_count())
            .finish()
    }
}

impl Default for BindingCompiler {
    fn default() -> Self {
        Self::new(GeneratorLibrary::with_defaults())
    }
}

impl BindingCompiler {
    /// Create a compiler with the default cache capacity
    #[must_use]
    pub fn new(library: GeneratorLibrary) -> Self {
        Self::with_capacity(library, DEFAULT_CACHE_CAPACITY)
    }

    /// Create a compiler caching up to `capacity` bindings
    #[must_use]
    pub fn with_capacity(library: GeneratorLibrary, capacity: u64) -> Self {
        Self {
            library: Arc::new(library),
            adapters: AdapterTable::global(),
            cache: Cache::new(capacity),
        }
    }

    /// Generator library used for lookups
    #[inline]
    #[must_use]
    pub fn library(&self) -> &GeneratorLibrary {
        &self.library
    }

    /// Compile recipe text
    ///
    /// `output` is the kind the caller needs. [`Kind::Value`] keeps the
    /// native output kind of the last stage.
    ///
    /// # Errors
    /// Returns [`BindingError`] for syntax errors, unknown generators, bad
    /// arguments, or stages that cannot be adapted to each other.
    pub fn compile(&self, recipe: &str, output: Kind) -> Result<CompiledBinding, BindingError> {
        let key = (recipe.trim().to_string(), output);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let parsed = Recipe::parse(recipe).map_err(|source| BindingError::Recipe {
            recipe: recipe.to_string(),
            source,
        })?;
        let binding = self.compile_recipe(&key.0, &parsed, output)?;
        tracing::debug!(recipe = %key.0, output = %binding.output_kind(), "compiled binding");
        self.cache.insert(key, binding.clone());
        Ok(binding)
    }

    fn compile_recipe(
        &self,
        text: &str,
        recipe: &Recipe,
        output: Kind,
    ) -> Result<CompiledBinding, BindingError> {
        let adapt_err = |stage: usize| {
            move |source| BindingError::Adapt {
                recipe: text.to_string(),
                stage,
                source,
            }
        };

        let mut chain: Option<Func> = None;
        for (stage, call) in recipe.stages().iter().enumerate() {
            let func = self.library.instantiate(call)?;
            let native = func.shape();
            chain = Some(match chain {
                None => self
                    .adapters
                    .adapt_exact(func, Shape::new(Kind::Long, native.output))
                    .map_err(adapt_err(stage))?,
                Some(upstream) => {
                    let feed = upstream.shape().output;
                    let next = self
                        .adapters
                        .adapt_exact(func, Shape::new(feed, native.output))
                        .map_err(adapt_err(stage))?;
                    upstream.then(next).map_err(adapt_err(stage))?
                }
            });
        }

        let last = recipe.stages().len().saturating_sub(1);
        let chain = chain.ok_or_else(|| BindingError::Recipe {
            recipe: text.to_string(),
            source: crate::error::RecipeError::Empty,
        })?;
        let body = self
            .adapters
            .adapt(chain, Shape::new(Kind::Long, output))
            .map_err(adapt_err(last))?
            .into_long_input()
            .ok_or_else(|| BindingError::invalid(text, "compiled chain does not take a cycle"))?;

        Ok(CompiledBinding {
            inner: Arc::new(Compiled {
                recipe: text.to_string(),
                body,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_single_stage_preserves_native_kind() {
        let compiler = BindingCompiler::default();
        let binding = compiler.compile("Mod(5)", Kind::Value).unwrap();
        assert_eq!(binding.output_kind(), Kind::Long);
        assert_eq!(binding.apply(12), Ok(Value::Long(2)));
    }

    #[test]
    fn compile_adapts_between_stages() {
        let compiler = BindingCompiler::default();
        let binding = compiler
            .compile("Mod(100); ToString(); Prefix('id-')", Kind::Value)
            .unwrap();
        assert_eq!(binding.apply(142), Ok(Value::from("id-42")));
    }

    #[test]
    fn compile_parses_text_into_numeric_stage() {
        let compiler = BindingCompiler::default();
        let binding = compiler.compile("ToString(); Add(1)", Kind::Value).unwrap();
        assert_eq!(binding.apply(41), Ok(Value::Long(42)));
    }

    #[test]
    fn compile_converts_to_requested_kind() {
        let compiler = BindingCompiler::default();
        let binding = compiler.compile("Identity()", Kind::Text).unwrap();
        assert_eq!(binding.output_kind(), Kind::Text);
        assert_eq!(binding.apply(9), Ok(Value::from("9")));
    }

    #[test]
    fn compile_reuses_cached_binding() {
        let compiler = BindingCompiler::default();
        let a = compiler.compile("Hash()", Kind::Value).unwrap();
        let b = compiler.compile(" Hash() ", Kind::Value).unwrap();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
    }

    #[test]
    fn compile_reports_errors_eagerly() {
        let compiler = BindingCompiler::default();
        assert!(matches!(
            compiler.compile("Mod(5", Kind::Value),
            Err(BindingError::Recipe { .. })
        ));
        assert!(matches!(
            compiler.compile("Mod(5); Bogus()", Kind::Value),
            Err(BindingError::UnknownGenerator { .. })
        ));
    }

    #[test]
    fn apply_text_appends_rendering() {
        let compiler = BindingCompiler::default();
        let binding = compiler.compile("Scale(0.5)", Kind::Value).unwrap();
        let mut buf = String::from("x=");
        binding.apply_text(3, &mut buf).unwrap();
        assert_eq!(buf, "x=1.5");
    }
}
