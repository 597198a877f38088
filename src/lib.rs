//! Mint - an indentation-based templating engine
//!
//! Templates are parsed into a tree, compiled into a flat procedure and
//! executed against caller bindings. A [`Loader`] finds templates by name
//! across search directories and resolves `#base` inheritance.
//!
//! # Example
//!
//! ```rust
//! use mint::{context, Template};
//!
//! let template = Template::new("@p Hello, {{ name }}");
//! let html = template.render(context! { name => "World" }).unwrap();
//! assert_eq!(html, "<p>Hello, World</p>");
//! ```

pub mod compiler;
pub mod config;
pub mod error;
pub mod loader;
pub mod parser;
pub mod runtime;
pub mod template;

pub use config::Config;
pub use error::{CompileError, Error, ExecError, ParseError};
pub use loader::Loader;
pub use runtime::{Context, RenderContext, Value};
pub use template::Template;

/// Render template source in one step, without inheritance
pub fn render(source: &str, ctx: Context) -> Result<String, Error> {
    Template::new(source).render(ctx)
}
