//! Template loader: resolves names against an ordered list of directories

use std::fs;
use std::ops::Add;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use log::{debug, trace};

use crate::config::Config;
use crate::error::Error;
use crate::template::{lock, Template};

/// Shared loader state; templates point back here weakly
#[derive(Debug)]
pub(crate) struct LoaderState {
    config: Config,
    search_dirs: Mutex<Vec<PathBuf>>,
    cache: Mutex<IndexMap<String, Arc<Template>>>,
}

/// Locates templates by name across search directories.
///
/// The first directory holding a regular file with the requested name wins.
/// Clones share the same search path and cache.
#[derive(Debug, Clone)]
pub struct Loader {
    state: Arc<LoaderState>,
}

impl Loader {
    /// Loader over `dirs` with caching disabled
    ///
    /// An uncached loader re-reads the file on every lookup.
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self::with_config(dirs, Config::default().with_cache(false))
    }

    /// Loader over `dirs`; `config` is also handed to every template it creates
    pub fn with_config<I, P>(dirs: I, config: Config) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let search_dirs = dirs
            .into_iter()
            .map(|dir| {
                let dir = dir.as_ref();
                std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf())
            })
            .collect();
        Self {
            state: Arc::new(LoaderState {
                config,
                search_dirs: Mutex::new(search_dirs),
                cache: Mutex::new(IndexMap::new()),
            }),
        }
    }

    pub(crate) fn from_state(state: Arc<LoaderState>) -> Self {
        Self { state }
    }

    pub fn search_dirs(&self) -> Vec<PathBuf> {
        lock(&self.state.search_dirs).clone()
    }

    pub fn cache_enabled(&self) -> bool {
        self.state.config.cache
    }

    /// Names of memoized templates, in the order they were first loaded
    pub fn cached_names(&self) -> Vec<String> {
        lock(&self.state.cache).keys().cloned().collect()
    }

    /// Resolve `name` to a template.
    ///
    /// A memoized template is returned without touching the filesystem.
    pub fn get_template(&self, name: &str) -> Result<Arc<Template>, Error> {
        if self.cache_enabled() {
            if let Some(template) = lock(&self.state.cache).get(name) {
                debug!("template cache hit: {}", name);
                return Ok(Arc::clone(template));
            }
        }

        let Some(path) = self.locate(name) else {
            debug!("template not found: {}", name);
            return Err(Error::NotFound {
                name: name.to_string(),
            });
        };

        debug!("loading template {} from {}", name, path.display());
        let source = fs::read_to_string(&path).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;
        let template = Arc::new(Template::from_loader(
            source,
            path.display().to_string(),
            self.state.config,
            Arc::downgrade(&self.state),
        ));

        if !self.cache_enabled() {
            return Ok(template);
        }
        // Another thread may have loaded the same name meanwhile; first insert wins
        let mut cache = lock(&self.state.cache);
        Ok(Arc::clone(cache.entry(name.to_string()).or_insert(template)))
    }

    fn locate(&self, name: &str) -> Option<PathBuf> {
        if !is_relative_name(name) {
            return None;
        }
        let dirs = self.search_dirs();
        dirs.iter().map(|dir| dir.join(name)).find(|path| {
            trace!("probing {}", path.display());
            path.is_file()
        })
    }
}

/// Names must stay inside the search directories
fn is_relative_name(name: &str) -> bool {
    let path = Path::new(name);
    !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Concatenate search paths: `self`'s directories keep priority.
///
/// The right-hand loader's cache is not merged.
impl Add for Loader {
    type Output = Loader;

    fn add(self, rhs: Loader) -> Loader {
        let extra = rhs.search_dirs();
        lock(&self.state.search_dirs).extend(extra);
        self
    }
}
