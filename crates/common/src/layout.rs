//! Tool-home directory layout.
//!
//! ```text
//! <tool-home>/
//!   config.toml
//!   cache/<key>.rkyv
//!   backups/<snapshot-id>/{manifest.json, files/..., transactions.json}
//!   reports/<command>-<timestamp>.json
//!   proofs.jsonl
//! ```

use std::path::{Path, PathBuf};

/// Directory created inside a project when no explicit home is configured.
pub const DEFAULT_HOME_DIR: &str = ".warden";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolHome {
    root: PathBuf,
}

impl ToolHome {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<project_root>/.warden`
    pub fn for_project(project_root: &Path) -> Self {
        Self::new(project_root.join(DEFAULT_HOME_DIR))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join("proofs.jsonl")
    }

    /// Creates the home and its fixed subdirectories.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [self.cache_dir(), self.backups_dir(), self.reports_dir()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let home = ToolHome::for_project(Path::new("/repo"));
        assert_eq!(home.root(), Path::new("/repo/.warden"));
        assert_eq!(home.cache_dir(), Path::new("/repo/.warden/cache"));
        assert_eq!(home.ledger_path(), Path::new("/repo/.warden/proofs.jsonl"));
    }

    #[test]
    fn test_ensure_creates_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let home = ToolHome::new(tmp.path().join("home"));
        home.ensure().unwrap();
        assert!(home.cache_dir().is_dir());
        assert!(home.backups_dir().is_dir());
        assert!(home.reports_dir().is_dir());
    }
}
