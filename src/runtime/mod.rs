//! Runtime: values, execution environment and the procedure executor

pub mod builtins;
mod exec;
mod namespace;
mod output;
mod value;

pub use exec::{eval, execute};
pub use namespace::Namespace;
pub use output::{escape_html, RenderContext};
pub use value::{Context, Function, NativeFn, Value};

/// Name under which an executed procedure publishes its [`RenderContext`]
pub const CONTEXT_NAME: &str = "__mint__";
