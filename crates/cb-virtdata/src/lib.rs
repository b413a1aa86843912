//! Deterministic data generation for cyclebench
//!
//! Everything here is a pure function of a 64-bit cycle number:
//! - [`Value`]: tagged values produced by bindings
//! - [`Kind`] and [`Shape`]: the closed set of call shapes
//! - [`Func`]: generator functions tagged by shape
//! - [`AdapterTable`]: pairwise kind conversions with modulo narrowing
//! - [`Recipe`]: `Ctor(args);Ctor(args)` syntax
//! - [`GeneratorLibrary`]: the registry of generator constructors
//! - [`BindingCompiler`]: recipe text to [`CompiledBinding`]
//!
//! # Example
//!
//! ```rust,ignore
//! use cb_virtdata::prelude::*;
//!
//! let compiler = BindingCompiler::default();
//! let binding = compiler.compile("Mod(5)", Kind::Value)?;
//! let values: Vec<_> = (0..10).map(|c| binding.apply(c)).collect();
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod adapter;
pub mod compiler;
pub mod error;
pub mod func;
pub mod library;
pub mod recipe;
pub mod shape;
pub mod value;

pub use adapter::{adapt, AdapterTable, Conversion};
pub use compiler::{BindingCompiler, CompiledBinding};
pub use error::{AdaptError, BindingError, FuncError, RecipeError, ValueError};
pub use func::{FnOf, Func, Out, Scalar};
pub use library::{GeneratorLibrary, GeneratorSpec, MAX_GENERATED_SIZE};
pub use recipe::{Arg, Call, Recipe};
pub use shape::{Kind, Shape};
pub use value::{FromValue, Value};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BindingCompiler, BindingError, CompiledBinding, FromValue, Func, Kind, Shape, Value,
    };
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
