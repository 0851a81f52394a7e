//! Path filter shared by the folder watcher and the staging copy.
//!
//! A path is ignored when it lies inside an excluded directory (the push
//! directory, so the pipeline never reacts to its own writes) or when it, or
//! one of its ancestors relative to the root, matches an ignore glob.

use std::path::{Path, PathBuf};

use glob::Pattern;

use crate::error::SyncError;

#[derive(Debug, Clone)]
pub struct IgnoreFilter {
    root: PathBuf,
    excluded_dirs: Vec<PathBuf>,
    patterns: Vec<Pattern>,
}

impl IgnoreFilter {
    pub fn new(root: &Path, patterns: &[String]) -> Result<Self, SyncError> {
        let patterns = patterns
            .iter()
            .map(|raw| {
                Pattern::new(raw).map_err(|source| SyncError::Pattern {
                    pattern: raw.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            root: absolutize(root),
            excluded_dirs: Vec::new(),
            patterns,
        })
    }

    /// Exclude everything below `dir`. Resolve it after the directory exists
    /// so symlinked temp dirs compare equal to watcher paths.
    pub fn exclude_dir(mut self, dir: &Path) -> Self {
        let abs = absolutize(dir);
        if !self.excluded_dirs.contains(&abs) {
            self.excluded_dirs.push(abs);
        }
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        let abs = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        if self.excluded_dirs.iter().any(|dir| abs.starts_with(dir)) {
            return true;
        }

        let Ok(relative) = abs.strip_prefix(&self.root) else {
            return false;
        };
        if relative.as_os_str().is_empty() {
            return false;
        }

        relative
            .ancestors()
            .filter(|a| !a.as_os_str().is_empty())
            .any(|a| self.patterns.iter().any(|p| p.matches_path(a)))
    }
}

/// Canonical form when the path exists, plain absolute form otherwise.
pub(crate) fn absolutize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
