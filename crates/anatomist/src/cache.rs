//! # Parse Cache: Content-Addressed Unit Store
//!
//! Units are keyed by [`common::content_key`] (content, file identity, tool
//! version), so a hit is always safe to serve. The memory tier is a plain
//! `HashMap`; the optional disk tier stores one `rkyv` archive per key as
//! `<dir>/<key>.rkyv`, read back through `memmap2`.
//!
//! A damaged archive is a miss, never an error: it is logged and reparsed.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use crate::{AnatomistError, ParsedUnit};

#[derive(Debug, Default)]
pub struct ParseCache {
    dir: Option<PathBuf>,
    entries: HashMap<String, Arc<ParsedUnit>>,
}

impl ParseCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Memory tier backed by archives under `dir` (created if absent).
    pub fn persistent(dir: &Path) -> Result<Self, AnatomistError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: Some(dir.to_path_buf()),
            entries: HashMap::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up memory first, then disk. Disk hits are promoted to memory.
    pub fn get(&mut self, key: &str) -> Option<Arc<ParsedUnit>> {
        if let Some(unit) = self.entries.get(key) {
            return Some(Arc::clone(unit));
        }
        let unit = Arc::new(self.load_archive(key)?);
        self.entries.insert(key.to_string(), Arc::clone(&unit));
        Some(unit)
    }

    /// Stores a unit. A failed disk write is logged; the memory tier still
    /// holds the unit.
    pub fn insert(&mut self, unit: Arc<ParsedUnit>) {
        if let Err(e) = self.store_archive(&unit) {
            tracing::warn!(key = %unit.key, error = %e, "cache archive write failed");
        }
        self.entries.insert(unit.key.clone(), unit);
    }

    fn archive_path(&self, key: &str) -> Option<PathBuf> {
        // Keys are hex digests; anything else never touches the filesystem.
        if key.is_empty() || !key.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        self.dir.as_ref().map(|d| d.join(format!("{key}.rkyv")))
    }

    fn load_archive(&self, key: &str) -> Option<ParsedUnit> {
        let path = self.archive_path(key)?;
        let file = File::open(&path).ok()?;
        // SAFETY: The file handle is held for the duration of the mmap lifetime.
        let mmap = unsafe { Mmap::map(&file) }.ok()?;
        match rkyv::from_bytes::<ParsedUnit, rkyv::rancor::Error>(&mmap[..]) {
            Ok(unit) if unit.key == key => Some(unit),
            Ok(_) => {
                tracing::warn!(path = %path.display(), "cache archive key mismatch; ignoring");
                None
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt cache archive; ignoring");
                None
            }
        }
    }

    fn store_archive(&self, unit: &ParsedUnit) -> Result<(), AnatomistError> {
        let Some(path) = self.archive_path(&unit.key) else {
            return Ok(());
        };
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(unit)
            .map_err(|e| AnatomistError::CacheError(e.to_string()))?;

        // Write-then-rename so readers never map a half-written archive.
        let tmp = path.with_extension(format!("rkyv.tmp-{}", std::process::id()));
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ParseIssue, ParseStrategy};

    fn unit(key: &str) -> Arc<ParsedUnit> {
        Arc::new(ParsedUnit {
            file: "src/a.js".into(),
            key: key.into(),
            strategy: Some(ParseStrategy::Tsx),
            source: "let a = 1;".into(),
            nodes: vec![],
            errors: vec![ParseIssue {
                message: "x".into(),
                line: 1,
                column: 0,
            }],
            recovery: None,
        })
    }

    #[test]
    fn test_memory_hit() {
        let mut cache = ParseCache::in_memory();
        cache.insert(unit("abc123"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("abc123").unwrap().file, "src/a.js");
        assert!(cache.get("ffff").is_none());
    }

    #[test]
    fn test_disk_tier_survives_new_instance() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut cache = ParseCache::persistent(tmp.path()).unwrap();
            cache.insert(unit("abc123"));
        }
        assert!(tmp.path().join("abc123.rkyv").is_file());

        let mut fresh = ParseCache::persistent(tmp.path()).unwrap();
        let loaded = fresh.get("abc123").unwrap();
        assert_eq!(*loaded, *unit("abc123"));
    }

    #[test]
    fn test_corrupt_archive_is_a_miss() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("abc123.rkyv"), b"not an archive").unwrap();
        let mut cache = ParseCache::persistent(tmp.path()).unwrap();
        assert!(cache.get("abc123").is_none());
    }

    #[test]
    fn test_non_hex_key_skips_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cache = ParseCache::persistent(tmp.path()).unwrap();
        cache.insert(unit("../escape"));
        assert!(std::fs::read_dir(tmp.path()).unwrap().next().is_none());
        assert!(cache.get("../escape").is_some());
    }
}
