//! # Snapshot Store
//!
//! Full-copy snapshots of a project tree under `<tool-home>/backups/<id>/`:
//!
//! ```text
//! <id>/manifest.json     id, tag, description, timestamp, files, checksums
//! <id>/files/<relative>  byte-exact copies
//! ```
//!
//! Checksums are SHA-256 over the bytes that were written into the snapshot,
//! computed once at creation. Snapshots are never modified afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use common::{SourceFilter, TreeFile, WardenConfig};
use serde::{Deserialize, Serialize};

use crate::ShadowError;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const FILES_DIR: &str = "files";
pub const TRANSACTIONS_FILE: &str = "transactions.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub tag: String,
    pub description: String,
    pub timestamp_ms: u64,
    /// Tree-relative keys, sorted.
    pub files: Vec<String>,
    /// Key to lowercase hex SHA-256.
    pub checksums: BTreeMap<String, String>,
    pub total_bytes: u64,
    /// Files left out by the per-file size cap.
    #[serde(default)]
    pub skipped_oversize: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub removed: Vec<String>,
    pub freed_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotDiff {
    pub snapshot_id: String,
    pub deleted_files: Vec<String>,
    pub new_files: Vec<String>,
    pub modified_files: Vec<String>,
    /// Common files whose checksum was recomputed.
    pub checked: usize,
    /// `true` when the sample limit left common files unchecked.
    pub sampled: bool,
}

impl SnapshotDiff {
    pub fn is_clean(&self) -> bool {
        self.deleted_files.is_empty() && self.new_files.is_empty() && self.modified_files.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    filter: SourceFilter,
    max_file_bytes: u64,
    max_snapshots: usize,
}

impl SnapshotStore {
    /// Store rooted at `dir` (usually `ToolHome::backups_dir`), walking trees
    /// with the configured ignore rules.
    pub fn new(dir: impl Into<PathBuf>, config: &WardenConfig) -> Result<Self, ShadowError> {
        Ok(Self {
            dir: dir.into(),
            filter: config.source_filter()?,
            max_file_bytes: config.max_snapshot_file_bytes,
            max_snapshots: config.max_snapshots.max(1),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_dir(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    /// Files a snapshot of `root` would capture, and those over the size cap.
    pub fn eligible_files(&self, root: &Path) -> (Vec<TreeFile>, Vec<TreeFile>) {
        self.filter
            .walk_files(root)
            .into_iter()
            .partition(|f| f.size <= self.max_file_bytes)
    }

    /// Copies every eligible file of `root` into a new snapshot, then evicts
    /// the oldest snapshots beyond the retention cap.
    pub fn create(&self, root: &Path, tag: &str, description: &str) -> Result<Snapshot, ShadowError> {
        let snapshot = self.create_retained(root, tag, description, &BTreeSet::new())?;
        let report = self.evict(self.max_snapshots)?;
        if !report.removed.is_empty() {
            tracing::info!(
                removed = report.removed.len(),
                freed_bytes = report.freed_bytes,
                "evicted old snapshots"
            );
        }
        Ok(snapshot)
    }

    /// [`create`](SnapshotStore::create) without the eviction pass.
    ///
    /// Files in `required` are captured whatever their size; if one of them
    /// cannot be read the snapshot is discarded and the error returned.
    pub(crate) fn create_retained(
        &self,
        root: &Path,
        tag: &str,
        description: &str,
        required: &BTreeSet<String>,
    ) -> Result<Snapshot, ShadowError> {
        // Strictly increasing, so list order is creation order.
        let floor = self.latest()?.map(|s| s.timestamp_ms + 1).unwrap_or_default();
        let timestamp_ms = common::now_millis().max(floor);
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        let id = format!("{timestamp_ms}-{}", &uuid[..8]);
        let snap_dir = self.snapshot_dir(&id);

        let mut snapshot = Snapshot {
            id,
            tag: tag.to_string(),
            description: description.to_string(),
            timestamp_ms,
            files: Vec::new(),
            checksums: BTreeMap::new(),
            total_bytes: 0,
            skipped_oversize: Vec::new(),
        };
        if let Err(e) = self.write_snapshot(root, &snap_dir, required, &mut snapshot) {
            if let Err(cleanup) = fs::remove_dir_all(&snap_dir) {
                tracing::warn!(id = %snapshot.id, error = %cleanup, "partial snapshot not removed");
            }
            return Err(e);
        }
        tracing::info!(id = %snapshot.id, tag, files = snapshot.files.len(), "snapshot created");
        Ok(snapshot)
    }

    /// Copies the files and writes the manifest last.
    fn write_snapshot(
        &self,
        root: &Path,
        snap_dir: &Path,
        required: &BTreeSet<String>,
        snapshot: &mut Snapshot,
    ) -> Result<(), ShadowError> {
        let files_dir = snap_dir.join(FILES_DIR);
        fs::create_dir_all(&files_dir)?;

        let (mut eligible, oversize) = self.eligible_files(root);
        let (forced, oversize): (Vec<TreeFile>, Vec<TreeFile>) = oversize
            .into_iter()
            .partition(|f| required.contains(&f.relative));
        eligible.extend(forced);
        eligible.sort_by(|a, b| a.relative.cmp(&b.relative));

        for file in &eligible {
            let bytes = match fs::read(&file.path) {
                Ok(b) => b,
                Err(e) if required.contains(&file.relative) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(file = %file.relative, error = %e, "unreadable; left out of snapshot");
                    continue;
                }
            };
            let dest = files_dir.join(&file.relative);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&dest, &bytes)?;
            snapshot
                .checksums
                .insert(file.relative.clone(), common::sha256_hex(&bytes));
            snapshot.files.push(file.relative.clone());
            snapshot.total_bytes += bytes.len() as u64;
        }
        for file in &oversize {
            tracing::warn!(file = %file.relative, size = file.size, "over size cap; left out of snapshot");
        }
        snapshot.skipped_oversize = oversize.into_iter().map(|f| f.relative).collect();
        fs::write(snap_dir.join(MANIFEST_FILE), serde_json::to_vec_pretty(&*snapshot)?)?;
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Snapshot, ShadowError> {
        if !is_plain_name(id) {
            return Err(ShadowError::SnapshotNotFound(id.to_string()));
        }
        let path = self.snapshot_dir(id).join(MANIFEST_FILE);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ShadowError::SnapshotNotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| ShadowError::CorruptManifest {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }

    /// All readable snapshots, oldest first. Unreadable manifests are skipped.
    pub fn list(&self) -> Result<Vec<Snapshot>, ShadowError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            match self.load(&id) {
                Ok(s) => snapshots.push(s),
                Err(e) => tracing::warn!(id, error = %e, "skipping unreadable snapshot"),
            }
        }
        snapshots.sort_by(|a, b| a.timestamp_ms.cmp(&b.timestamp_ms).then_with(|| a.id.cmp(&b.id)));
        Ok(snapshots)
    }

    pub fn latest(&self) -> Result<Option<Snapshot>, ShadowError> {
        Ok(self.list()?.pop())
    }

    /// Removes all but the `keep` most recent snapshots.
    pub fn evict(&self, keep: usize) -> Result<EvictionReport, ShadowError> {
        let snapshots = self.list()?;
        let excess = snapshots.len().saturating_sub(keep);
        let mut report = EvictionReport::default();
        for snapshot in snapshots.into_iter().take(excess) {
            let dir = self.snapshot_dir(&snapshot.id);
            let freed = dir_size(&dir);
            fs::remove_dir_all(&dir)?;
            tracing::debug!(id = %snapshot.id, freed, "snapshot evicted");
            report.freed_bytes += freed;
            report.removed.push(snapshot.id);
        }
        Ok(report)
    }

    /// Path of the stored copy of `relative` inside `snapshot`.
    pub fn stored_file(&self, snapshot: &Snapshot, relative: &str) -> Result<PathBuf, ShadowError> {
        if !is_safe_relative(relative) {
            return Err(ShadowError::InvalidPath(relative.to_string()));
        }
        Ok(self.snapshot_dir(&snapshot.id).join(FILES_DIR).join(relative))
    }

    /// Compares `snapshot` with the current state of `root`.
    ///
    /// File sets are compared in full, whatever the size cap: a captured file
    /// that has since outgrown it is compared like any other, and files the
    /// cap kept out of the snapshot are never reported as new. Checksums of
    /// common files are recomputed for at most `sample_limit` files (in key
    /// order).
    pub fn diff(
        &self,
        snapshot: &Snapshot,
        root: &Path,
        sample_limit: Option<usize>,
    ) -> Result<SnapshotDiff, ShadowError> {
        let current = self.filter.walk_files(root);
        let current: BTreeMap<&str, &TreeFile> =
            current.iter().map(|f| (f.relative.as_str(), f)).collect();
        let captured: BTreeSet<&str> = snapshot.files.iter().map(String::as_str).collect();
        let untracked: BTreeSet<&str> = snapshot.skipped_oversize.iter().map(String::as_str).collect();

        let deleted_files = captured
            .iter()
            .filter(|k| !current.contains_key(*k))
            .map(|k| k.to_string())
            .collect();
        let new_files = current
            .keys()
            .filter(|k| !captured.contains(*k) && !untracked.contains(*k))
            .map(|k| k.to_string())
            .collect();

        let common: Vec<&TreeFile> = current
            .iter()
            .filter(|(k, _)| captured.contains(*k))
            .map(|(_, f)| *f)
            .collect();
        let limit = sample_limit.unwrap_or(usize::MAX);
        let mut modified_files = Vec::new();
        let mut checked = 0;
        for file in common.iter().take(limit) {
            checked += 1;
            let now = match fs::read(&file.path) {
                Ok(bytes) => common::sha256_hex(&bytes),
                Err(e) => {
                    tracing::warn!(file = %file.relative, error = %e, "unreadable during diff; treated as modified");
                    String::new()
                }
            };
            if snapshot.checksums.get(&file.relative) != Some(&now) {
                modified_files.push(file.relative.clone());
            }
        }

        Ok(SnapshotDiff {
            snapshot_id: snapshot.id.clone(),
            deleted_files,
            new_files,
            modified_files,
            checked,
            sampled: checked < common.len(),
        })
    }
}

/// A single path component without separators or dots.
fn is_plain_name(id: &str) -> bool {
    !id.is_empty() && !id.contains(['/', '\\']) && id != "." && id != ".."
}

/// Relative, and never climbs out of its base.
pub(crate) fn is_safe_relative(relative: &str) -> bool {
    let path = Path::new(relative);
    !relative.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn dir_size(dir: &Path) -> u64 {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("src/components")).unwrap();
        fs::write(tmp.path().join("src/index.js"), "import './components/A';\n").unwrap();
        fs::write(tmp.path().join("src/components/A.jsx"), "export const A = 1;\n").unwrap();
        fs::write(tmp.path().join("package.json"), "{}\n").unwrap();
        fs::create_dir_all(tmp.path().join("node_modules/x")).unwrap();
        fs::write(tmp.path().join("node_modules/x/index.js"), "1").unwrap();
        tmp
    }

    fn store(home: &Path) -> SnapshotStore {
        SnapshotStore::new(home.join("backups"), &WardenConfig::default()).unwrap()
    }

    #[test]
    fn test_round_trip_reports_one_modified_file() {
        let project = tree();
        let home = tempfile::tempdir().unwrap();
        let store = store(home.path());

        let snap = store.create(project.path(), "pre-fix", "before fixes").unwrap();
        assert_eq!(
            snap.files,
            vec!["package.json", "src/components/A.jsx", "src/index.js"]
        );
        let original = snap.checksums["src/index.js"].clone();

        fs::write(project.path().join("src/index.js"), "changed\n").unwrap();
        let diff = store.diff(&snap, project.path(), None).unwrap();
        assert_eq!(diff.modified_files, vec!["src/index.js"]);
        assert!(diff.deleted_files.is_empty() && diff.new_files.is_empty());
        assert!(!diff.sampled);

        let stored = store.stored_file(&snap, "src/index.js").unwrap();
        assert_eq!(common::sha256_hex(&fs::read(stored).unwrap()), original);
    }

    #[test]
    fn test_new_and_deleted_files() {
        let project = tree();
        let home = tempfile::tempdir().unwrap();
        let store = store(home.path());
        let snap = store.create(project.path(), "t", "").unwrap();

        fs::remove_file(project.path().join("package.json")).unwrap();
        fs::write(project.path().join("src/extra.ts"), "export {};\n").unwrap();
        let diff = store.diff(&snap, project.path(), Some(1)).unwrap();
        assert_eq!(diff.deleted_files, vec!["package.json"]);
        assert_eq!(diff.new_files, vec!["src/extra.ts"]);
        assert_eq!(diff.checked, 1);
        assert!(diff.sampled);
    }

    #[test]
    fn test_eviction_keeps_most_recent() {
        let project = tree();
        let home = tempfile::tempdir().unwrap();
        let config = WardenConfig {
            max_snapshots: 2,
            ..WardenConfig::default()
        };
        let store = SnapshotStore::new(home.path().join("backups"), &config).unwrap();
        let ids: Vec<String> = (0..3)
            .map(|i| store.create(project.path(), &format!("s{i}"), "").unwrap().id)
            .collect();

        let listed: Vec<String> = store.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(listed, ids[1..].to_vec());
        assert_eq!(store.latest().unwrap().unwrap().id, ids[2]);

        let report = store.evict(0).unwrap();
        assert_eq!(report.removed.len(), 2);
        assert!(report.freed_bytes > 0);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_size_cap_and_unknown_ids() {
        let project = tree();
        fs::write(project.path().join("big.js"), vec![b'x'; 64]).unwrap();
        let home = tempfile::tempdir().unwrap();
        let config = WardenConfig {
            max_snapshot_file_bytes: 32,
            ..WardenConfig::default()
        };
        let store = SnapshotStore::new(home.path().join("backups"), &config).unwrap();
        let snap = store.create(project.path(), "t", "").unwrap();
        assert_eq!(snap.skipped_oversize, vec!["big.js"]);
        assert!(!snap.files.contains(&"big.js".to_string()));

        // Still over the cap and untouched: not a new file.
        let diff = store.diff(&snap, project.path(), None).unwrap();
        assert!(diff.is_clean());

        assert!(matches!(store.load("nope"), Err(ShadowError::SnapshotNotFound(_))));
        assert!(matches!(store.load("../x"), Err(ShadowError::SnapshotNotFound(_))));
        assert!(matches!(
            store.stored_file(&snap, "../etc/passwd"),
            Err(ShadowError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_file_grown_past_cap_is_modified() {
        let project = tree();
        let home = tempfile::tempdir().unwrap();
        let config = WardenConfig {
            max_snapshot_file_bytes: 32,
            ..WardenConfig::default()
        };
        let store = SnapshotStore::new(home.path().join("backups"), &config).unwrap();
        let snap = store.create(project.path(), "t", "").unwrap();

        fs::write(project.path().join("src/index.js"), vec![b'y'; 100]).unwrap();
        let diff = store.diff(&snap, project.path(), None).unwrap();
        assert_eq!(diff.modified_files, vec!["src/index.js"]);
        assert!(diff.deleted_files.is_empty());
    }

    #[test]
    fn test_required_files_bypass_size_cap() {
        let project = tree();
        fs::write(project.path().join("big.js"), vec![b'x'; 64]).unwrap();
        let home = tempfile::tempdir().unwrap();
        let config = WardenConfig {
            max_snapshot_file_bytes: 32,
            ..WardenConfig::default()
        };
        let store = SnapshotStore::new(home.path().join("backups"), &config).unwrap();
        let required = BTreeSet::from(["big.js".to_string()]);
        let snap = store.create_retained(project.path(), "t", "", &required).unwrap();
        assert!(snap.files.contains(&"big.js".to_string()));
        assert!(snap.skipped_oversize.is_empty());
        let stored = store.stored_file(&snap, "big.js").unwrap();
        assert_eq!(fs::read(stored).unwrap().len(), 64);
    }
}
