//! Configuration shared by templates and loaders

/// Indentation width used when none is configured
pub const DEFAULT_INDENT: usize = 4;

/// Options controlling how templates are parsed and memoized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Memoize trees and procedures, and release source after compiling
    pub cache: bool,

    /// Number of spaces per nesting level
    pub indent: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: true,
            indent: DEFAULT_INDENT,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether artifacts are memoized
    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Set the indentation width
    pub fn with_indent(mut self, indent: usize) -> Self {
        self.indent = indent;
        self
    }
}
