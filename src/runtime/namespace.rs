use std::collections::HashMap;

use indexmap::IndexMap;

use crate::runtime::builtins;
use crate::runtime::output::RenderContext;
use crate::runtime::value::{Context, Value};

/// Variable bindings visible to an executing procedure.
///
/// Built from the builtins with the caller's [`Context`] layered on top, so a
/// caller binding wins over a builtin of the same name. Procedures hand
/// their output back through [`Namespace::publish`].
#[derive(Debug, Default)]
pub struct Namespace {
    vars: IndexMap<String, Value>,
    published: HashMap<String, RenderContext>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespace holding every builtin
    pub fn with_builtins() -> Self {
        let mut namespace = Self::new();
        for (name, value) in builtins::defaults() {
            namespace.vars.insert(name.to_string(), value);
        }
        namespace
    }

    /// Layer caller bindings on top of the existing ones
    pub fn extend(&mut self, ctx: Context) {
        for (name, value) in ctx {
            self.vars.insert(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Bind `name`, returning the value it shadowed
    pub fn set(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.vars.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.shift_remove(name)
    }

    pub fn publish(&mut self, name: impl Into<String>, output: RenderContext) {
        self.published.insert(name.into(), output);
    }

    pub fn take_published(&mut self, name: &str) -> Option<RenderContext> {
        self.published.remove(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_bindings_shadow_builtins() {
        let mut namespace = Namespace::with_builtins();
        assert!(matches!(namespace.get("len"), Some(Value::Function(_))));

        namespace.extend(Context::new().with("len", "shadowed"));
        assert_eq!(namespace.get("len"), Some(&Value::from("shadowed")));
        assert!(matches!(namespace.get("upper"), Some(Value::Function(_))));
    }

    #[test]
    fn test_set_returns_shadowed_value() {
        let mut namespace = Namespace::new();
        assert_eq!(namespace.set("x", Value::Int(1)), None);
        assert_eq!(namespace.set("x", Value::Int(2)), Some(Value::Int(1)));
        assert_eq!(namespace.remove("x"), Some(Value::Int(2)));
        assert_eq!(namespace.get("x"), None);
    }

    #[test]
    fn test_publish_and_take() {
        let mut namespace = Namespace::new();
        namespace.publish("out", RenderContext::default());
        assert!(namespace.take_published("out").is_some());
        assert!(namespace.take_published("out").is_none());
    }
}
