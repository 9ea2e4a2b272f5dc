//! Source-tree walking shared by discovery and snapshots.
//!
//! Walks lazily with `walkdir`, pruning skip directories before descending,
//! and returns files sorted by tree-relative key so every consumer sees the
//! same deterministic order.

use crate::config::ConfigError;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A file found during a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeFile {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Tree-relative key (forward slashes).
    pub relative: String,
    /// Size in bytes at walk time.
    pub size: u64,
}

/// Compiled walk rules: extension allowlist, skip dirs, ignore globs.
#[derive(Debug, Clone)]
pub struct SourceFilter {
    extensions: Vec<String>,
    skip_dirs: Vec<String>,
    excluded: Vec<PathBuf>,
    ignore: GlobSet,
}

impl SourceFilter {
    pub fn new(
        extensions: &[String],
        skip_dirs: &[String],
        ignore_globs: &[String],
    ) -> Result<Self, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for g in ignore_globs {
            builder.add(Glob::new(g)?);
        }
        Ok(Self {
            extensions: extensions.to_vec(),
            skip_dirs: skip_dirs.to_vec(),
            excluded: Vec::new(),
            ignore: builder.build()?,
        })
    }

    /// Also prunes these directories (compared as walked paths).
    pub fn excluding(mut self, dirs: &[PathBuf]) -> Self {
        self.excluded.extend(dirs.iter().cloned());
        self
    }

    /// `true` if a directory with this name is never descended into.
    pub fn skips_dir(&self, name: &str) -> bool {
        self.skip_dirs.iter().any(|d| d == name)
    }

    /// `true` if the tree-relative key matches an ignore glob.
    pub fn is_ignored(&self, relative: &str) -> bool {
        self.ignore.is_match(relative)
    }

    /// `true` if the key has an allowlisted extension and is not ignored.
    pub fn is_source(&self, relative: &str) -> bool {
        let ext = Path::new(relative)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        self.extensions.iter().any(|e| e == ext) && !self.is_ignored(relative)
    }

    /// All non-ignored files under `root` (any extension).
    pub fn walk_files(&self, root: &Path) -> Vec<TreeFile> {
        self.walk(root, |_| true)
    }

    /// Allowlisted source files under `root`.
    pub fn walk_sources(&self, root: &Path) -> Vec<TreeFile> {
        self.walk(root, |rel| self.is_source(rel))
    }

    fn walk(&self, root: &Path, keep: impl Fn(&str) -> bool) -> Vec<TreeFile> {
        if !root.is_dir() {
            tracing::warn!(root = %root.display(), "walk root missing; empty result");
            return Vec::new();
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(root).follow_links(false).into_iter();
        for entry in walker.filter_entry(|e| {
            // The root itself is never pruned, whatever its name.
            e.depth() == 0
                || !e.file_type().is_dir()
                || !(e
                    .file_name()
                    .to_str()
                    .map(|name| self.skips_dir(name))
                    .unwrap_or(false)
                    || self.excluded.iter().any(|d| d == e.path()))
        }) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(relative) = crate::relative_key(root, entry.path()) else {
                continue;
            };
            if self.is_ignored(&relative) || !keep(&relative) {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            files.push(TreeFile {
                path: entry.path().to_path_buf(),
                relative,
                size,
            });
        }

        files.sort_by(|a, b| a.relative.cmp(&b.relative));
        files
    }
}
