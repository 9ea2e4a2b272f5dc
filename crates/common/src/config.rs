//! # Warden Configuration
//!
//! Loaded from `<tool-home>/config.toml` when present. Every field has a
//! default, so a partial file only overrides what it names.

use crate::walk::SourceFilter;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Errors from configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid config file: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("Invalid ignore glob: {0}")]
    GlobError(#[from] globset::Error),
}

/// Source extensions collected by discovery.
const DEFAULT_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs", "cjs"];

/// Directory names pruned during every tree walk.
const DEFAULT_SKIP_DIRS: &[&str] = &[
    "node_modules",
    "dist",
    "build",
    "out",
    "coverage",
    ".git",
    ".next",
    ".warden",
];

/// File globs (tree-relative) excluded from discovery and snapshots.
const DEFAULT_IGNORE_GLOBS: &[&str] = &[
    "**/*.test.*",
    "**/*.spec.*",
    "**/__tests__/**",
    "**/*.d.ts",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// File extensions (without dot) treated as source files.
    pub extensions: Vec<String>,
    /// Directory names never descended into.
    pub skip_dirs: Vec<String>,
    /// Tree-relative globs excluded from discovery and snapshots.
    pub ignore_globs: Vec<String>,
    /// Files larger than this are left out of snapshots.
    pub max_snapshot_file_bytes: u64,
    /// Snapshots retained after each creation (oldest evicted first).
    pub max_snapshots: usize,
    /// Upper bound on files whose checksum is recomputed while diffing.
    /// `None` checks every common file.
    pub diff_sample_limit: Option<usize>,
    /// Files sampled to estimate backup size during pre-flight.
    pub disk_sample_files: usize,
    /// Available memory below this is reported by the memory check.
    pub min_free_memory_bytes: u64,
    /// Bytes of original text kept in a recovery unit.
    pub recovery_prefix_bytes: usize,
    /// Let pre-flight stash uncommitted changes (`git stash push -u`).
    pub auto_stash: bool,
    /// Absolute directories pruned from every walk, whatever their name.
    /// Set at runtime (the resolved tool home), never read from file.
    #[serde(skip)]
    pub excluded_dirs: Vec<PathBuf>,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            skip_dirs: DEFAULT_SKIP_DIRS.iter().map(|s| s.to_string()).collect(),
            ignore_globs: DEFAULT_IGNORE_GLOBS.iter().map(|s| s.to_string()).collect(),
            max_snapshot_file_bytes: 5 * 1024 * 1024,
            max_snapshots: 10,
            diff_sample_limit: None,
            disk_sample_files: 100,
            min_free_memory_bytes: 256 * 1024 * 1024,
            recovery_prefix_bytes: 16 * 1024,
            auto_stash: false,
            excluded_dirs: Vec::new(),
        }
    }
}

impl WardenConfig {
    /// Parses a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.is_file() {
            tracing::debug!(path = %path.display(), "loading config");
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Compiles the walk rules into a reusable [`SourceFilter`].
    pub fn source_filter(&self) -> Result<SourceFilter, ConfigError> {
        Ok(SourceFilter::new(&self.extensions, &self.skip_dirs, &self.ignore_globs)?
            .excluding(&self.excluded_dirs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "max_snapshots = 3\n").unwrap();

        let config = WardenConfig::load(&path).unwrap();
        assert_eq!(config.max_snapshots, 3);
        assert_eq!(config.extensions, WardenConfig::default().extensions);
    }

    #[test]
    fn test_missing_file_is_default() {
        let tmp = tempfile::tempdir().unwrap();
        let config = WardenConfig::load_or_default(&tmp.path().join("nope.toml")).unwrap();
        assert_eq!(config, WardenConfig::default());
    }

    #[test]
    fn test_bad_glob_rejected() {
        let config = WardenConfig {
            ignore_globs: vec!["[".into()],
            ..Default::default()
        };
        assert!(config.source_filter().is_err());
    }
}
