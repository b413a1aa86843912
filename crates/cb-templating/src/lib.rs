//! Op templates for cyclebench
//!
//! Turns declared ops into per-cycle values:
//! - [`bind_points`]: `{name}` and `{{recipe}}` scanning, capture points
//! - [`ParsedTemplate`]: a string split into literal and anchor spans
//! - [`FieldParser`]: static or dynamic classification of nested values
//! - [`ParsedTemplateMap`]: payload, op param and activity param lookups
//! - [`CommandTemplate`]: a flat string view for simple drivers
//! - [`ParamsParser`]: `name=value;name=value` text
//!
//! # Example
//!
//! ```rust,ignore
//! use cb_templating::prelude::*;
//!
//! let raw = RawOpTemplate::new("read")
//!     .with_field("stmt", "select * from t where id={id}")
//!     .with_binding("id", "Mod(1000)");
//! let op = ParsedTemplateMap::resolve(&raw, None, &BindingCompiler::default())?;
//! let fields = op.apply(1042)?;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod bind_points;
pub mod command_template;
pub mod config_source;
pub mod error;
pub mod field;
pub mod params;
pub mod parsed_template;
pub mod template_map;

pub use bind_points::{BindPoint, BindPointKind, CapturePoint};
pub use command_template::CommandTemplate;
pub use config_source::ConfigSource;
pub use error::{OpConfigError, ParamsError, TemplateError};
pub use field::{ConcatTemplate, DynamicField, FieldParser, FieldTemplate};
pub use params::ParamsParser;
pub use parsed_template::{ParsedTemplate, TemplateKind};
pub use template_map::{CycleFn, ParsedTemplateMap, RawOpTemplate};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ConfigSource, OpConfigError, ParsedTemplateMap, RawOpTemplate, TemplateError,
    };
    pub use cb_virtdata::{BindingCompiler, Value};
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
