//! # Pre-flight Checks
//!
//! Run before any mutating operation. Each check has a severity and one
//! remediation attempt; a failed critical check whose remediation did not
//! succeed blocks the run (see [`PreflightReport::blocking`]).
//!
//! Host facts (VCS state, free disk, free memory) come through [`HostProbe`]
//! so tests can stage any combination.

use std::path::Path;
use std::process::Command;

use common::WardenConfig;
use serde::Serialize;

use crate::snapshot::SnapshotStore;

pub const CHECK_VCS_CLEAN: &str = "vcs_clean";
pub const CHECK_DISK_SPACE: &str = "disk_space";
pub const CHECK_WRITE_PERMISSION: &str = "write_permission";
pub const CHECK_DEPENDENCIES: &str = "dependencies";
pub const CHECK_MEMORY: &str = "memory";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Remediation {
    pub action: String,
    pub attempted: bool,
    pub succeeded: bool,
    pub detail: String,
}

impl Remediation {
    /// A step only a human can take.
    fn manual(action: &str, detail: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            attempted: false,
            succeeded: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub severity: CheckSeverity,
    pub passed: bool,
    pub detail: String,
    pub remediation: Option<Remediation>,
}

impl CheckResult {
    fn pass(name: &'static str, severity: CheckSeverity, detail: impl Into<String>) -> Self {
        Self {
            name,
            severity,
            passed: true,
            detail: detail.into(),
            remediation: None,
        }
    }

    fn fail(
        name: &'static str,
        severity: CheckSeverity,
        detail: impl Into<String>,
        remediation: Remediation,
    ) -> Self {
        Self {
            name,
            severity,
            passed: false,
            detail: detail.into(),
            remediation: Some(remediation),
        }
    }

    fn remediated(&self) -> bool {
        self.remediation.as_ref().is_some_and(|r| r.succeeded)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub dry_run: bool,
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Failed critical checks with no successful remediation.
    pub fn blocking(&self) -> Vec<&CheckResult> {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.severity == CheckSeverity::Critical && !c.remediated())
            .collect()
    }

    pub fn is_blocked(&self) -> bool {
        !self.blocking().is_empty()
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

/// Host facts consulted by the checks. `None` means "unknown", which passes.
pub trait HostProbe {
    /// `Some(true)` when `root` is a git work tree with uncommitted changes.
    fn vcs_dirty(&self, root: &Path) -> Option<bool>;
    fn free_disk_bytes(&self, root: &Path) -> Option<u64>;
    fn available_memory_bytes(&self) -> Option<u64>;
    /// Stashes uncommitted changes, including untracked files.
    fn stash(&self, root: &Path) -> Result<(), String>;
}

/// Live host facts from `git` and `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl HostProbe for SystemProbe {
    fn vcs_dirty(&self, root: &Path) -> Option<bool> {
        if !root.join(".git").exists() {
            return None;
        }
        let output = Command::new("git")
            .arg("-C")
            .arg(root)
            .args(["status", "--porcelain"])
            .output()
            .ok()?;
        output
            .status
            .success()
            .then(|| !output.stdout.iter().all(u8::is_ascii_whitespace))
    }

    fn free_disk_bytes(&self, root: &Path) -> Option<u64> {
        let root = dunce::canonicalize(root).ok()?;
        let disks = sysinfo::Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|d| root.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space())
    }

    fn available_memory_bytes(&self) -> Option<u64> {
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        match sys.available_memory() {
            0 => None,
            bytes => Some(bytes),
        }
    }

    fn stash(&self, root: &Path) -> Result<(), String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(root)
            .args(["stash", "push", "-u", "-m", "warden pre-flight"])
            .output()
            .map_err(|e| e.to_string())?;
        if output.status.success() {
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }
}

/// Projected size of a full snapshot of `root`: the mean size of the first
/// `sample` eligible files scaled to the full file count.
pub fn estimate_backup_bytes(store: &SnapshotStore, root: &Path, sample: usize) -> u64 {
    let (files, _) = store.eligible_files(root);
    if files.is_empty() {
        return 0;
    }
    let sampled = &files[..files.len().min(sample.max(1))];
    let sampled_bytes: u64 = sampled.iter().map(|f| f.size).sum();
    sampled_bytes / sampled.len() as u64 * files.len() as u64
}

/// Runs every check against `root`. Remediations are not attempted in
/// dry-run mode.
pub fn run_checks(
    root: &Path,
    config: &WardenConfig,
    store: &SnapshotStore,
    probe: &dyn HostProbe,
    dry_run: bool,
) -> PreflightReport {
    let checks = vec![
        check_vcs(root, config, probe, dry_run),
        check_disk(root, config, store, probe, dry_run),
        check_write_permission(root, dry_run),
        check_dependencies(root),
        check_memory(config, probe),
    ];
    for check in &checks {
        if check.passed {
            tracing::debug!(check = check.name, "pre-flight ok");
        } else {
            tracing::warn!(check = check.name, severity = ?check.severity, detail = %check.detail, "pre-flight check failed");
        }
    }
    let report = PreflightReport { dry_run, checks };
    tracing::info!(blocked = report.is_blocked(), "pre-flight complete");
    report
}

fn check_vcs(root: &Path, config: &WardenConfig, probe: &dyn HostProbe, dry_run: bool) -> CheckResult {
    const ACTION: &str = "stash uncommitted changes";
    match probe.vcs_dirty(root) {
        None => CheckResult::pass(CHECK_VCS_CLEAN, CheckSeverity::Warning, "not a git work tree"),
        Some(false) => CheckResult::pass(CHECK_VCS_CLEAN, CheckSeverity::Warning, "working tree clean"),
        Some(true) => {
            let remediation = if dry_run {
                Remediation::manual(ACTION, "skipped in dry run")
            } else if !config.auto_stash {
                Remediation::manual(ACTION, "auto_stash disabled; commit or stash manually")
            } else {
                let result = probe.stash(root);
                Remediation {
                    action: ACTION.to_string(),
                    attempted: true,
                    succeeded: result.is_ok(),
                    detail: result.err().unwrap_or_else(|| "changes stashed".to_string()),
                }
            };
            CheckResult::fail(
                CHECK_VCS_CLEAN,
                CheckSeverity::Warning,
                "uncommitted changes in working tree",
                remediation,
            )
        }
    }
}

fn check_disk(
    root: &Path,
    config: &WardenConfig,
    store: &SnapshotStore,
    probe: &dyn HostProbe,
    dry_run: bool,
) -> CheckResult {
    const ACTION: &str = "evict oldest backups";
    let required = estimate_backup_bytes(store, root, config.disk_sample_files).saturating_mul(2);
    let Some(free) = probe.free_disk_bytes(root) else {
        return CheckResult::pass(CHECK_DISK_SPACE, CheckSeverity::Critical, "free space unknown");
    };
    if free > required || required == 0 {
        return CheckResult::pass(
            CHECK_DISK_SPACE,
            CheckSeverity::Critical,
            format!("{free} bytes free, {required} required"),
        );
    }

    let detail = format!("{free} bytes free, {required} required");
    let remediation = if dry_run {
        Remediation::manual(ACTION, "skipped in dry run")
    } else {
        match store.evict(1) {
            Ok(report) => {
                let free_after = free.saturating_add(report.freed_bytes);
                Remediation {
                    action: ACTION.to_string(),
                    attempted: true,
                    succeeded: free_after > required,
                    detail: format!(
                        "removed {} snapshots, freed {} bytes",
                        report.removed.len(),
                        report.freed_bytes
                    ),
                }
            }
            Err(e) => Remediation {
                action: ACTION.to_string(),
                attempted: true,
                succeeded: false,
                detail: e.to_string(),
            },
        }
    };
    CheckResult::fail(CHECK_DISK_SPACE, CheckSeverity::Critical, detail, remediation)
}

/// Dry runs read permission bits only; real runs create and remove a
/// probe file in `root`.
fn check_write_permission(root: &Path, dry_run: bool) -> CheckResult {
    if dry_run {
        return match std::fs::metadata(root) {
            Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => CheckResult::pass(
                CHECK_WRITE_PERMISSION,
                CheckSeverity::Critical,
                "project root writable (permission bits)",
            ),
            Ok(_) => write_denied(root, "read-only or not a directory"),
            Err(e) => write_denied(root, &e.to_string()),
        };
    }

    let probe = root.join(format!(".warden-write-probe-{}", uuid::Uuid::new_v4().simple()));
    match std::fs::write(&probe, b"") {
        Ok(()) => {
            if let Err(e) = std::fs::remove_file(&probe) {
                tracing::warn!(path = %probe.display(), error = %e, "write probe not removed");
            }
            CheckResult::pass(CHECK_WRITE_PERMISSION, CheckSeverity::Critical, "project root writable")
        }
        Err(e) => write_denied(root, &e.to_string()),
    }
}

fn write_denied(root: &Path, reason: &str) -> CheckResult {
    CheckResult::fail(
        CHECK_WRITE_PERMISSION,
        CheckSeverity::Critical,
        format!("cannot write to {}: {reason}", root.display()),
        Remediation::manual("request write permission", "grant write access to the project root"),
    )
}

fn check_dependencies(root: &Path) -> CheckResult {
    if root.join("package.json").is_file() && !root.join("node_modules").is_dir() {
        CheckResult::fail(
            CHECK_DEPENDENCIES,
            CheckSeverity::Warning,
            "package.json present but node_modules missing",
            Remediation::manual("install dependencies", "run the package manager install"),
        )
    } else {
        CheckResult::pass(CHECK_DEPENDENCIES, CheckSeverity::Warning, "dependencies present")
    }
}

fn check_memory(config: &WardenConfig, probe: &dyn HostProbe) -> CheckResult {
    match probe.available_memory_bytes() {
        Some(free) if free < config.min_free_memory_bytes => CheckResult::fail(
            CHECK_MEMORY,
            CheckSeverity::Warning,
            format!("{free} bytes available, {} wanted", config.min_free_memory_bytes),
            Remediation::manual("free memory", "close memory-heavy processes"),
        ),
        Some(free) => CheckResult::pass(CHECK_MEMORY, CheckSeverity::Warning, format!("{free} bytes available")),
        None => CheckResult::pass(CHECK_MEMORY, CheckSeverity::Warning, "available memory unknown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FakeProbe {
        dirty: Option<bool>,
        free_disk: Option<u64>,
        memory: Option<u64>,
        stashed: Cell<bool>,
    }

    impl FakeProbe {
        fn healthy() -> Self {
            Self {
                dirty: Some(false),
                free_disk: Some(u64::MAX),
                memory: Some(u64::MAX),
                stashed: Cell::new(false),
            }
        }
    }

    impl HostProbe for FakeProbe {
        fn vcs_dirty(&self, _: &Path) -> Option<bool> {
            self.dirty
        }
        fn free_disk_bytes(&self, _: &Path) -> Option<u64> {
            self.free_disk
        }
        fn available_memory_bytes(&self) -> Option<u64> {
            self.memory
        }
        fn stash(&self, _: &Path) -> Result<(), String> {
            self.stashed.set(true);
            Ok(())
        }
    }

    fn project() -> (tempfile::TempDir, tempfile::TempDir, SnapshotStore) {
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("a.js"), vec![b'x'; 1000]).unwrap();
        let home = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(home.path().join("backups"), &WardenConfig::default()).unwrap();
        (project, home, store)
    }

    #[test]
    fn test_healthy_host_passes() {
        let (project, _home, store) = project();
        let report = run_checks(project.path(), &WardenConfig::default(), &store, &FakeProbe::healthy(), false);
        assert!(report.checks.iter().all(|c| c.passed), "{:?}", report.checks);
        assert!(!report.is_blocked());
        assert_eq!(report.checks.len(), 5);
    }

    #[test]
    fn test_low_disk_blocks() {
        let (project, _home, store) = project();
        let probe = FakeProbe {
            free_disk: Some(10),
            ..FakeProbe::healthy()
        };
        let report = run_checks(project.path(), &WardenConfig::default(), &store, &probe, false);
        let blocking = report.blocking();
        assert_eq!(blocking.len(), 1);
        assert_eq!(blocking[0].name, CHECK_DISK_SPACE);
        assert!(blocking[0].remediation.as_ref().unwrap().attempted);
    }

    #[test]
    fn test_warnings_never_block() {
        let (project, _home, store) = project();
        std::fs::write(project.path().join("package.json"), "{}").unwrap();
        let probe = FakeProbe {
            dirty: Some(true),
            memory: Some(1),
            ..FakeProbe::healthy()
        };
        let report = run_checks(project.path(), &WardenConfig::default(), &store, &probe, false);
        assert!(!report.check(CHECK_VCS_CLEAN).unwrap().passed);
        assert!(!report.check(CHECK_DEPENDENCIES).unwrap().passed);
        assert!(!report.check(CHECK_MEMORY).unwrap().passed);
        assert!(!report.is_blocked());
        // auto_stash is off by default.
        assert!(!probe.stashed.get());
    }

    #[test]
    fn test_stash_remediation_skipped_in_dry_run() {
        let (project, _home, store) = project();
        let config = WardenConfig {
            auto_stash: true,
            ..WardenConfig::default()
        };
        let probe = FakeProbe {
            dirty: Some(true),
            ..FakeProbe::healthy()
        };
        run_checks(project.path(), &config, &store, &probe, true);
        assert!(!probe.stashed.get());

        let report = run_checks(project.path(), &config, &store, &probe, false);
        assert!(probe.stashed.get());
        assert!(report.check(CHECK_VCS_CLEAN).unwrap().remediated());
    }

    #[test]
    fn test_backup_estimate_extrapolates() {
        let (project, _home, store) = project();
        std::fs::write(project.path().join("b.js"), vec![b'y'; 3000]).unwrap();
        // One sampled file (a.js, 1000 bytes) scaled to two files.
        assert_eq!(estimate_backup_bytes(&store, project.path(), 1), 2000);
        assert_eq!(estimate_backup_bytes(&store, project.path(), 10), 4000);
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_dry_run_writes_nothing_to_root() {
        let (project, _home, store) = project();
        let before = listing(project.path());
        let report = run_checks(project.path(), &WardenConfig::default(), &store, &FakeProbe::healthy(), true);
        let write = report.check(CHECK_WRITE_PERMISSION).unwrap();
        assert!(write.passed);
        assert!(write.detail.contains("permission bits"));
        assert_eq!(listing(project.path()), before);
    }

    #[test]
    fn test_missing_root_is_not_writable() {
        let (project, _home, store) = project();
        let absent = project.path().join("absent");
        let report = run_checks(&absent, &WardenConfig::default(), &store, &FakeProbe::healthy(), true);
        assert!(report.blocking().iter().any(|c| c.name == CHECK_WRITE_PERMISSION));
    }
}
