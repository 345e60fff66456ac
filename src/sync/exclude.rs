//! Exclude patterns applied when scanning the local file tree.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path};

/// Files never worth syncing.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    // OS-specific
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
    // Editor swap and backup files
    "*.swp",
    "*.swo",
    "*~",
    // Temporary files, including our own partial writes
    "*.tmp",
    "*.temp",
    "*.partial",
];

/// Compiled set of glob patterns matched against relative paths.
#[derive(Debug, Clone)]
pub struct ExcludePatterns {
    glob_set: GlobSet,
    patterns: Vec<String>,
}

impl Default for ExcludePatterns {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ExcludePatterns {
    /// Nothing excluded.
    pub fn new() -> Self {
        Self {
            glob_set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }

    /// Only the built-in defaults.
    pub fn with_defaults() -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut patterns = Vec::new();

        for pattern in DEFAULT_EXCLUDES {
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
                patterns.push(pattern.to_string());
            }
        }

        Self {
            glob_set: builder.build().unwrap_or_else(|_| GlobSet::empty()),
            patterns,
        }
    }

    /// Exactly the given patterns.
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut pattern_list = Vec::new();

        for pattern in patterns {
            let pattern = pattern.as_ref();
            builder.add(Glob::new(pattern)?);
            pattern_list.push(pattern.to_string());
        }

        Ok(Self {
            glob_set: builder.build()?,
            patterns: pattern_list,
        })
    }

    /// The defaults plus user-supplied patterns.
    pub fn with_extra<S: AsRef<str>>(extra: &[S]) -> Result<Self> {
        let mut all: Vec<String> = DEFAULT_EXCLUDES.iter().map(|p| p.to_string()).collect();
        for pattern in extra {
            let pattern = pattern.as_ref().trim();
            if !pattern.is_empty() && !all.iter().any(|p| p == pattern) {
                all.push(pattern.to_string());
            }
        }
        Self::from_patterns(&all)
    }

    /// Whether a forward-slash relative path should be skipped. Matches the
    /// whole path, then each component, so `node_modules` excludes the
    /// directory's contents too.
    pub fn is_excluded(&self, path: &str) -> bool {
        if self.glob_set.is_empty() {
            return false;
        }
        if self.glob_set.is_match(path) {
            return true;
        }

        Path::new(path).components().any(|component| match component {
            Component::Normal(name) => self.glob_set.is_match(name.to_string_lossy().as_ref()),
            _ => false,
        })
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
