//! A single template and its parse/compile/render lifecycle
//!
//! Artifacts are produced lazily: the tree on first access, the procedure on
//! first compile. With caching enabled both are memoized behind their own
//! lock, together with the parse outline (base name and declared slots),
//! and the source text is dropped once the procedure exists. The outline
//! then stands in for the source whenever a child template needs this one
//! re-resolved.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, trace, warn};

use crate::compiler::{self, Procedure};
use crate::config::Config;
use crate::error::{Error, ExecError};
use crate::loader::{Loader, LoaderState};
use crate::parser::{self, layer_slots, Parsed, Slots, Tree};
use crate::runtime::{self, Context, Namespace, CONTEXT_NAME};

/// Filename reported for templates not backed by a file
pub const DEFAULT_FILENAME: &str = "<string>";

/// Lock a mutex, recovering the guard if another thread panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct Template {
    filename: String,
    config: Config,
    source: Mutex<Option<String>>,
    /// Parse without overrides: own base and `#def`s, or the default tree
    outline: Mutex<Option<Arc<Parsed>>>,
    tree: Mutex<Option<Arc<Tree>>>,
    procedure: Mutex<Option<Arc<Procedure>>>,
    /// Loader that created this template; never keeps it alive
    loader: Option<Weak<LoaderState>>,
}

impl Template {
    /// Template from source text, with caching enabled and no loader
    pub fn new(source: impl Into<String>) -> Self {
        Self::with_config(source, Config::default())
    }

    pub fn with_config(source: impl Into<String>, config: Config) -> Self {
        Self {
            filename: DEFAULT_FILENAME.to_string(),
            config,
            source: Mutex::new(Some(source.into())),
            outline: Mutex::new(None),
            tree: Mutex::new(None),
            procedure: Mutex::new(None),
            loader: None,
        }
    }

    /// Set the name used in errors and logs
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub(crate) fn from_loader(
        source: String,
        filename: String,
        config: Config,
        loader: Weak<LoaderState>,
    ) -> Self {
        Self {
            loader: Some(loader),
            ..Self::with_config(source, config).with_filename(filename)
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn cache_enabled(&self) -> bool {
        self.config.cache
    }

    /// Source text, or `None` once it has been released after compiling
    pub fn source(&self) -> Option<String> {
        lock(&self.source).clone()
    }

    /// Whether a compiled procedure is memoized
    pub fn is_compiled(&self) -> bool {
        lock(&self.procedure).is_some()
    }

    /// Parse this template with `overrides` applied to its slots.
    ///
    /// If the template declares a base, the base is resolved through the
    /// owning loader and parsed with this template's slots as its overrides.
    pub fn parse(&self, overrides: &Slots) -> Result<Tree, Error> {
        self.parse_chain(overrides, &mut Vec::new())
    }

    fn parse_chain(&self, overrides: &Slots, chain: &mut Vec<String>) -> Result<Tree, Error> {
        if chain.contains(&self.filename) {
            chain.push(self.filename.clone());
            return Err(Error::InheritanceCycle {
                chain: chain.join(" -> "),
            });
        }
        chain.push(self.filename.clone());

        let outline = self.outline()?;
        let Some(base) = &outline.base else {
            return Ok(outline.tree.with_overrides(overrides));
        };
        let slots = layer_slots(outline.slots.clone(), overrides);

        let Some(loader) = &self.loader else {
            return Err(Error::NoLoader {
                filename: self.filename.clone(),
                base: base.node.clone(),
            });
        };
        let Some(state) = loader.upgrade() else {
            return Err(Error::LoaderDropped {
                filename: self.filename.clone(),
                base: base.node.clone(),
            });
        };

        debug!("{} extends {}", self.filename, base.node);
        let base_template = Loader::from_state(state).get_template(&base.node)?;
        base_template.parse_chain(&slots, chain)
    }

    /// Parse without overrides, memoized when caching.
    ///
    /// Overrides are applied on top of the outline by the caller, so the
    /// outline is all that is needed once the source has been released.
    fn outline(&self) -> Result<Arc<Parsed>, Error> {
        let mut memo = lock(&self.outline);
        if let Some(outline) = memo.as_ref() {
            trace!("reusing parse outline of {}", self.filename);
            return Ok(Arc::clone(outline));
        }
        let source = lock(&self.source).clone();
        let Some(source) = source else {
            return Err(Error::SourceUnavailable {
                filename: self.filename.clone(),
            });
        };
        let outline = Arc::new(parser::parse(&source, self.config.indent, &Slots::new())?);
        if self.config.cache {
            *memo = Some(Arc::clone(&outline));
        }
        Ok(outline)
    }

    /// Resolved tree of this template.
    ///
    /// With caching the tree is computed once and the same `Arc` is
    /// returned afterwards; without caching every call reparses.
    pub fn tree(&self) -> Result<Arc<Tree>, Error> {
        if !self.config.cache {
            return Ok(Arc::new(self.parse(&Slots::new())?));
        }

        let mut memo = lock(&self.tree);
        if let Some(tree) = memo.as_ref() {
            return Ok(Arc::clone(tree));
        }
        let tree = Arc::new(self.parse(&Slots::new())?);
        *memo = Some(Arc::clone(&tree));
        Ok(tree)
    }

    /// Compiled procedure of this template.
    ///
    /// With caching the procedure is memoized and the source is released.
    pub fn compile(&self) -> Result<Arc<Procedure>, Error> {
        if !self.config.cache {
            let tree = self.tree()?;
            return Ok(Arc::new(compiler::compile(&tree, &self.filename)?));
        }

        let mut memo = lock(&self.procedure);
        if let Some(procedure) = memo.as_ref() {
            return Ok(Arc::clone(procedure));
        }
        let tree = self.tree()?;
        debug!("compiling {}", self.filename);
        let procedure = Arc::new(compiler::compile(&tree, &self.filename)?);
        *memo = Some(Arc::clone(&procedure));
        self.release_source();
        Ok(procedure)
    }

    /// Drop the source text; only allowed once the tree and outline are memoized
    fn release_source(&self) {
        let tree_memoized = lock(&self.tree).is_some();
        let memoized = tree_memoized && lock(&self.outline).is_some();
        debug_assert!(memoized, "source released before the tree was memoized");
        if !memoized {
            warn!("keeping source of {}: tree is not memoized", self.filename);
            return;
        }
        trace!("releasing source of {}", self.filename);
        *lock(&self.source) = None;
    }

    /// Render with `ctx` layered over the builtins
    pub fn render(&self, ctx: Context) -> Result<String, Error> {
        let procedure = self.compile()?;

        let mut namespace = Namespace::with_builtins();
        namespace.extend(ctx);
        runtime::execute(&procedure, &mut namespace)?;

        let output = namespace
            .take_published(CONTEXT_NAME)
            .ok_or_else(|| ExecError::MissingContext {
                name: CONTEXT_NAME.to_string(),
            })?;
        let mut buffer = String::new();
        output.render(&mut buffer);
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;
    use crate::error::CompileError;

    #[test]
    fn test_template_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Template>();
    }

    #[test]
    fn test_defaults() {
        let template = Template::new("hello");
        assert_eq!(template.filename(), DEFAULT_FILENAME);
        assert!(template.cache_enabled());
        assert_eq!(template.source().as_deref(), Some("hello"));
        assert!(!template.is_compiled());
    }

    #[test]
    fn test_cached_tree_is_shared() {
        let template = Template::new("@p {{ x }}\n");
        let first = template.tree().expect("Should parse");
        let second = template.tree().expect("Should parse");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_uncached_tree_is_fresh() {
        let template = Template::with_config("@p {{ x }}\n", Config::new().with_cache(false));
        let first = template.tree().expect("Should parse");
        let second = template.tree().expect("Should parse");
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first, second);
    }

    #[test]
    fn test_compile_releases_source_and_memoizes() {
        let template = Template::new("Hello\n");
        let first = template.compile().expect("Should compile");
        assert!(template.source().is_none());
        assert!(template.is_compiled());

        let second = template.compile().expect("Should compile");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_uncached_compile_keeps_source() {
        let template = Template::with_config("Hello\n", Config::new().with_cache(false));
        template.compile().expect("Should compile");
        assert_eq!(template.source().as_deref(), Some("Hello\n"));
        assert!(!template.is_compiled());
    }

    #[test]
    fn test_parse_after_release_uses_memoized_tree() {
        let template = Template::new("#def body:\n    X\n");
        template.compile().expect("Should compile");
        assert!(template.source().is_none());

        let mut overrides = Slots::new();
        overrides.insert(
            "body".to_string(),
            vec![parser::Node::Text(vec![parser::Piece::Literal("Y".to_string())])],
        );
        let fresh = parser::parse("#def body:\n    X\n", 4, &overrides).expect("Should parse");
        assert_eq!(template.parse(&overrides).expect("Should resolve"), fresh.tree);
    }

    #[test]
    fn test_render_hello_world() {
        let template = Template::new("Hello, {{ name }}");
        let out = template.render(context! { name => "World" }).expect("Should render");
        assert_eq!(out, "Hello, World");
    }

    #[test]
    fn test_render_twice() {
        let template = Template::new("{{ n + 1 }}");
        assert_eq!(template.render(context! { n => 1 }).expect("Should render"), "2");
        assert_eq!(template.render(context! { n => 2 }).expect("Should render"), "3");
    }

    #[test]
    fn test_base_without_loader_fails() {
        let template = Template::new("#base: layout.mint\n#def body:\n    Y\n").with_filename("page.mint");
        match template.render(Context::new()) {
            Err(Error::NoLoader { filename, base }) => {
                assert_eq!(filename, "page.mint");
                assert_eq!(base, "layout.mint");
            }
            other => panic!("Expected NoLoader, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_surfaces() {
        let template = Template::new("@p\n      too deep\n");
        assert!(matches!(template.tree(), Err(Error::Parse(_))));
    }

    #[test]
    fn test_compile_error_carries_filename() {
        let template = Template::new("{{ x | bogus }}").with_filename("bad.mint");
        match template.compile() {
            Err(Error::Compile(CompileError::UnknownFilter { filename, name, .. })) => {
                assert_eq!(filename, "bad.mint");
                assert_eq!(name, "bogus");
            }
            other => panic!("Expected UnknownFilter, got {:?}", other),
        }
        // A failed compile keeps the source around
        assert!(template.source().is_some());
    }

    #[test]
    fn test_custom_indent() {
        let template = Template::with_config("@ul\n  @li a\n", Config::new().with_indent(2));
        assert_eq!(template.render(Context::new()).expect("Should render"), "<ul><li>a</li></ul>");
    }
}
