//! # Rollback
//!
//! A [`RollbackPlan`] is derived from a [`SnapshotDiff`] and consumed once by
//! [`execute_rollback`]. Real execution always captures an emergency snapshot
//! of the current tree before touching any file, and writes a transaction
//! log next to that snapshot whether or not the rollback completes.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::snapshot::{is_safe_relative, Snapshot, SnapshotDiff, SnapshotStore, TRANSACTIONS_FILE};
use crate::ShadowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    EmergencyBackup,
    /// Overwrite a modified file with its snapshot copy.
    Restore,
    /// Remove a file created after the snapshot.
    Delete,
    /// Recreate a file removed after the snapshot.
    RestoreDeleted,
    Verify,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackStep {
    pub action: StepAction,
    pub path: Option<String>,
    pub critical: bool,
}

impl RollbackStep {
    fn new(action: StepAction, path: Option<&str>, critical: bool) -> Self {
        Self {
            action,
            path: path.map(str::to_string),
            critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackPlan {
    pub snapshot_id: String,
    /// Modified and deleted files, restored from the snapshot.
    pub files_to_restore: Vec<String>,
    /// Files created after the snapshot.
    pub files_to_delete: Vec<String>,
    pub steps: Vec<RollbackStep>,
}

impl RollbackPlan {
    /// Ordered steps: emergency backup, restores, deletes, re-creations,
    /// verification.
    pub fn from_diff(snapshot: &Snapshot, diff: &SnapshotDiff) -> Self {
        let mut steps = vec![RollbackStep::new(StepAction::EmergencyBackup, None, true)];
        steps.extend(
            diff.modified_files
                .iter()
                .map(|f| RollbackStep::new(StepAction::Restore, Some(f), true)),
        );
        steps.extend(
            diff.new_files
                .iter()
                .map(|f| RollbackStep::new(StepAction::Delete, Some(f), false)),
        );
        steps.extend(
            diff.deleted_files
                .iter()
                .map(|f| RollbackStep::new(StepAction::RestoreDeleted, Some(f), true)),
        );
        steps.push(RollbackStep::new(StepAction::Verify, None, false));

        let mut files_to_restore: Vec<String> = diff
            .modified_files
            .iter()
            .chain(&diff.deleted_files)
            .cloned()
            .collect();
        files_to_restore.sort();
        Self {
            snapshot_id: snapshot.id.clone(),
            files_to_restore,
            files_to_delete: diff.new_files.clone(),
            steps,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files_to_restore.is_empty() && self.files_to_delete.is_empty()
    }

    /// Planned paths that currently exist in `root` and will be overwritten
    /// or removed.
    pub fn files_at_risk(&self, root: &Path) -> BTreeSet<String> {
        self.files_to_restore
            .iter()
            .chain(&self.files_to_delete)
            .filter(|f| is_safe_relative(f) && root.join(f).is_file())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEntry {
    pub action: StepAction,
    pub path: String,
    /// SHA-256 of the restored content (`None` for deletions).
    pub checksum: Option<String>,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLog {
    pub target_snapshot: String,
    pub emergency_snapshot: String,
    pub completed: bool,
    pub entries: Vec<TransactionEntry>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub dry_run: bool,
    pub plan: RollbackPlan,
    pub emergency_snapshot_id: Option<String>,
    pub restored: usize,
    pub deleted: usize,
    pub verified: bool,
}

/// Executes `plan` against `root`.
///
/// With `dry_run` nothing is written and the plan is returned as-is.
///
/// # Errors
/// `EmergencyIncomplete` when the emergency snapshot lacks a file the plan
/// would overwrite or delete; nothing is touched in that case.
/// `RollbackFailed` for any failure after the emergency snapshot exists; the
/// error carries its id. Failures before that point are returned unchanged.
pub fn execute_rollback(
    plan: RollbackPlan,
    store: &SnapshotStore,
    root: &Path,
    dry_run: bool,
) -> Result<RollbackReport, ShadowError> {
    if dry_run {
        tracing::info!(snapshot = %plan.snapshot_id, steps = plan.steps.len(), "rollback dry run");
        return Ok(RollbackReport {
            dry_run,
            plan,
            emergency_snapshot_id: None,
            restored: 0,
            deleted: 0,
            verified: false,
        });
    }

    let target = store.load(&plan.snapshot_id)?;
    let at_risk = plan.files_at_risk(root);
    // Emergency snapshot first; it must not evict the rollback target.
    let emergency = store.create_retained(
        root,
        "emergency",
        &format!("state before rollback to {}", target.id),
        &at_risk,
    )?;
    let missing: Vec<String> = at_risk
        .iter()
        .filter(|f| !emergency.checksums.contains_key(*f))
        .cloned()
        .collect();
    if !missing.is_empty() {
        if let Err(e) = fs::remove_dir_all(store.snapshot_dir(&emergency.id)) {
            tracing::warn!(id = %emergency.id, error = %e, "incomplete emergency snapshot not removed");
        }
        tracing::error!(?missing, "emergency snapshot incomplete; rollback refused");
        return Err(ShadowError::EmergencyIncomplete { missing });
    }
    tracing::info!(target = %target.id, emergency = %emergency.id, "rollback started");

    let mut log = TransactionLog {
        target_snapshot: target.id.clone(),
        emergency_snapshot: emergency.id.clone(),
        completed: false,
        entries: Vec::new(),
        error: None,
    };
    let result = apply_steps(&plan, &target, &emergency, &at_risk, store, root, &mut log);
    if let Err(e) = &result {
        log.error = Some(e.to_string());
    }
    log.completed = result.is_ok();

    let log_path = store.snapshot_dir(&emergency.id).join(TRANSACTIONS_FILE);
    let written = serde_json::to_vec_pretty(&log)
        .map_err(ShadowError::from)
        .and_then(|bytes| fs::write(&log_path, bytes).map_err(ShadowError::from));
    if let Err(e) = written {
        tracing::warn!(path = %log_path.display(), error = %e, "transaction log not written");
    }

    match result {
        Ok(verified) => {
            let restored = log.entries.iter().filter(|e| e.checksum.is_some()).count();
            let deleted = log.entries.len() - restored;
            tracing::info!(restored, deleted, verified, "rollback complete");
            Ok(RollbackReport {
                dry_run,
                plan,
                emergency_snapshot_id: Some(emergency.id),
                restored,
                deleted,
                verified,
            })
        }
        Err(e) => {
            tracing::error!(emergency = %emergency.id, error = %e, "rollback failed");
            Err(ShadowError::RollbackFailed {
                emergency_snapshot_id: emergency.id,
                reason: e.to_string(),
            })
        }
    }
}

/// Runs the file steps in order. Returns the outcome of the verify step.
fn apply_steps(
    plan: &RollbackPlan,
    target: &Snapshot,
    emergency: &Snapshot,
    at_risk: &BTreeSet<String>,
    store: &SnapshotStore,
    root: &Path,
    log: &mut TransactionLog,
) -> Result<bool, ShadowError> {
    let mut verified = true;
    for step in &plan.steps {
        match (step.action, step.path.as_deref()) {
            (StepAction::Restore | StepAction::RestoreDeleted, Some(relative)) => {
                let source = store.stored_file(target, relative)?;
                let bytes = fs::read(&source)?;
                let dest = root.join(relative);
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&dest, &bytes)?;
                log.entries.push(TransactionEntry {
                    action: step.action,
                    path: relative.to_string(),
                    checksum: Some(common::sha256_hex(&bytes)),
                    timestamp_ms: common::now_millis(),
                });
                tracing::debug!(file = relative, "restored");
            }
            (StepAction::Delete, Some(relative)) => {
                if !is_safe_relative(relative) {
                    return Err(ShadowError::InvalidPath(relative.to_string()));
                }
                match fs::remove_file(root.join(relative)) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                log.entries.push(TransactionEntry {
                    action: step.action,
                    path: relative.to_string(),
                    checksum: None,
                    timestamp_ms: common::now_millis(),
                });
                tracing::debug!(file = relative, "deleted");
            }
            (StepAction::Verify, _) => {
                verified = verify_tree(plan, target, emergency, at_risk, store, root);
            }
            _ => {}
        }
    }
    Ok(verified)
}

/// The tree matches every file of `target`, planned deletions are gone, and
/// each overwritten path has a stored emergency copy.
fn verify_tree(
    plan: &RollbackPlan,
    target: &Snapshot,
    emergency: &Snapshot,
    at_risk: &BTreeSet<String>,
    store: &SnapshotStore,
    root: &Path,
) -> bool {
    let mut verified = true;
    for (relative, expected) in &target.checksums {
        let now = fs::read(root.join(relative)).map(|b| common::sha256_hex(&b)).ok();
        if now.as_ref() != Some(expected) {
            tracing::warn!(file = %relative, "checksum differs from rollback target");
            verified = false;
        }
    }
    for relative in &plan.files_to_delete {
        if root.join(relative).exists() {
            tracing::warn!(file = %relative, "planned deletion still present");
            verified = false;
        }
    }
    for relative in at_risk {
        let stored = emergency.checksums.contains_key(relative)
            && store
                .stored_file(emergency, relative)
                .map(|p| p.is_file())
                .unwrap_or(false);
        if !stored {
            tracing::warn!(file = %relative, "overwritten file has no emergency copy");
            verified = false;
        }
    }
    verified
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::WardenConfig;

    fn setup() -> (tempfile::TempDir, tempfile::TempDir, SnapshotStore, Snapshot) {
        let project = tempfile::tempdir().unwrap();
        fs::create_dir_all(project.path().join("src")).unwrap();
        fs::write(project.path().join("src/a.js"), "export const a = 1;\n").unwrap();
        fs::write(project.path().join("src/b.js"), "export const b = 2;\n").unwrap();
        let home = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(home.path().join("backups"), &WardenConfig::default()).unwrap();
        let snap = store.create(project.path(), "pre-fix", "").unwrap();
        (project, home, store, snap)
    }

    #[test]
    fn test_plan_steps_and_criticality() {
        let (project, _home, store, snap) = setup();
        fs::write(project.path().join("src/a.js"), "broken").unwrap();
        fs::write(project.path().join("src/c.js"), "new").unwrap();
        fs::remove_file(project.path().join("src/b.js")).unwrap();

        let diff = store.diff(&snap, project.path(), None).unwrap();
        let plan = RollbackPlan::from_diff(&snap, &diff);
        let actions: Vec<(StepAction, bool)> = plan.steps.iter().map(|s| (s.action, s.critical)).collect();
        assert_eq!(
            actions,
            vec![
                (StepAction::EmergencyBackup, true),
                (StepAction::Restore, true),
                (StepAction::Delete, false),
                (StepAction::RestoreDeleted, true),
                (StepAction::Verify, false),
            ]
        );
        assert_eq!(plan.files_to_restore, vec!["src/a.js", "src/b.js"]);
        assert_eq!(plan.files_to_delete, vec!["src/c.js"]);
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let (project, _home, store, snap) = setup();
        fs::write(project.path().join("src/a.js"), "broken").unwrap();
        let diff = store.diff(&snap, project.path(), None).unwrap();
        let report = execute_rollback(RollbackPlan::from_diff(&snap, &diff), &store, project.path(), true).unwrap();
        assert!(report.dry_run && report.emergency_snapshot_id.is_none());
        assert_eq!(fs::read_to_string(project.path().join("src/a.js")).unwrap(), "broken");
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_rollback_restores_and_keeps_emergency_copy() {
        let (project, _home, store, snap) = setup();
        fs::write(project.path().join("src/a.js"), "broken").unwrap();
        fs::write(project.path().join("src/c.js"), "new").unwrap();

        let diff = store.diff(&snap, project.path(), None).unwrap();
        let report = execute_rollback(RollbackPlan::from_diff(&snap, &diff), &store, project.path(), false).unwrap();
        assert!(report.verified);
        assert_eq!((report.restored, report.deleted), (1, 1));

        let restored = fs::read(project.path().join("src/a.js")).unwrap();
        assert_eq!(common::sha256_hex(&restored), snap.checksums["src/a.js"]);
        assert!(!project.path().join("src/c.js").exists());

        // The emergency snapshot holds the overwritten and deleted files.
        let emergency_id = report.emergency_snapshot_id.unwrap();
        let emergency = store.load(&emergency_id).unwrap();
        assert!(emergency.files.contains(&"src/a.js".to_string()));
        assert!(emergency.files.contains(&"src/c.js".to_string()));
        let stored = store.stored_file(&emergency, "src/a.js").unwrap();
        assert_eq!(fs::read_to_string(stored).unwrap(), "broken");

        let log: TransactionLog = serde_json::from_slice(
            &fs::read(store.snapshot_dir(&emergency_id).join(TRANSACTIONS_FILE)).unwrap(),
        )
        .unwrap();
        assert!(log.completed);
        assert_eq!(log.entries.len(), 2);
    }

    #[test]
    fn test_failure_reports_emergency_id() {
        let (project, _home, store, snap) = setup();
        fs::write(project.path().join("src/a.js"), "broken").unwrap();
        let diff = store.diff(&snap, project.path(), None).unwrap();
        // Lose the stored copy so the restore step fails.
        fs::remove_file(store.stored_file(&snap, "src/a.js").unwrap()).unwrap();

        match execute_rollback(RollbackPlan::from_diff(&snap, &diff), &store, project.path(), false) {
            Err(ShadowError::RollbackFailed { emergency_snapshot_id, .. }) => {
                let log: TransactionLog = serde_json::from_slice(
                    &fs::read(store.snapshot_dir(&emergency_snapshot_id).join(TRANSACTIONS_FILE)).unwrap(),
                )
                .unwrap();
                assert!(!log.completed);
                assert!(log.error.is_some());
            }
            other => panic!("expected RollbackFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_file_grown_past_cap_keeps_emergency_copy() {
        let project = tempfile::tempdir().unwrap();
        fs::write(project.path().join("a.js"), "small\n").unwrap();
        let home = tempfile::tempdir().unwrap();
        let config = WardenConfig {
            max_snapshot_file_bytes: 32,
            ..WardenConfig::default()
        };
        let store = SnapshotStore::new(home.path().join("backups"), &config).unwrap();
        let snap = store.create(project.path(), "pre-fix", "").unwrap();

        let grown = "x".repeat(100);
        fs::write(project.path().join("a.js"), &grown).unwrap();
        let diff = store.diff(&snap, project.path(), None).unwrap();
        assert_eq!(diff.modified_files, vec!["a.js"]);
        assert!(diff.deleted_files.is_empty());

        let report = execute_rollback(RollbackPlan::from_diff(&snap, &diff), &store, project.path(), false).unwrap();
        assert!(report.verified);
        assert_eq!(fs::read_to_string(project.path().join("a.js")).unwrap(), "small\n");

        let emergency = store.load(&report.emergency_snapshot_id.unwrap()).unwrap();
        assert!(emergency.skipped_oversize.is_empty());
        let stored = store.stored_file(&emergency, "a.js").unwrap();
        assert_eq!(fs::read_to_string(stored).unwrap(), grown);
    }

    #[test]
    fn test_sampled_plan_fails_verification() {
        let (project, _home, store, snap) = setup();
        fs::write(project.path().join("src/a.js"), "CHANGED\n").unwrap();
        fs::write(project.path().join("src/b.js"), "CHANGED\n").unwrap();

        // A sampled diff only sees src/a.js.
        let diff = store.diff(&snap, project.path(), Some(1)).unwrap();
        assert_eq!(diff.modified_files, vec!["src/a.js"]);
        let report = execute_rollback(RollbackPlan::from_diff(&snap, &diff), &store, project.path(), false).unwrap();
        assert!(!report.verified);
        assert_eq!(fs::read_to_string(project.path().join("src/b.js")).unwrap(), "CHANGED\n");
    }
}
