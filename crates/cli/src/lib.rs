//! # Warden Orchestrator
//!
//! Sequences the engines into the five workflows the binary exposes:
//!
//! - `scan`: pre-flight, snapshot, graph analysis.
//! - `fix`: pre-flight, snapshot, analysis, then apply and verify every
//!   candidate rule per file. A file is written only after each of its
//!   accepted transformations verified.
//! - `verify`: proof-chain integrity plus defects still present.
//! - `rollback`: pre-flight, diff against a snapshot, transactional restore.
//! - `status`: snapshots, cache, rule counters, ledger summary.
//!
//! A blocking pre-flight report halts `fix` and `rollback` unless `force`
//! is set. Dry runs never write to the project tree.

pub mod report;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anatomist::path_util::canonical_root;
use anatomist::{ImportResolver, ParseCache, ParserHost, SuffixResolver};
use anyhow::Context;
use common::{SourceFilter, ToolHome, WardenConfig};
use forge::{TransformContext, TransformationRegistry};
use oracle::{analyze_project, ProjectAnalysis};
use shadow::{execute_rollback, run_checks, HostProbe, PreflightReport, RollbackPlan, SnapshotStore, SystemProbe};
use vault::ProofLedger;

pub use report::{
    FixCandidate, FixReport, RollbackSummary, ScanReport, SnapshotInfo, StatusReport, VerifyReport,
};

/// Tag of snapshots taken by rollback itself; never a default rollback target.
const EMERGENCY_TAG: &str = "emergency";

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Pre-flight blocked the run: {}", checks.join(", "))]
    Blocked { checks: Vec<String> },

    #[error("No snapshot available to roll back to")]
    NoSnapshot,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    /// Skip the snapshot and every remediation.
    pub dry_run: bool,
    /// Snapshot even when pre-flight is blocked.
    pub force: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FixOptions {
    /// Report candidates without transforming anything.
    pub dry_run: bool,
    pub force: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    /// Target snapshot; the latest non-emergency snapshot when `None`.
    pub snapshot_id: Option<String>,
    pub dry_run: bool,
    pub force: bool,
}

pub struct Warden {
    root: PathBuf,
    home: ToolHome,
    config: WardenConfig,
    filter: SourceFilter,
    host: ParserHost,
    registry: TransformationRegistry,
    store: SnapshotStore,
    resolver: Box<dyn ImportResolver>,
    probe: Box<dyn HostProbe>,
}

impl Warden {
    /// Opens `root` with its tool home: loads `config.toml` if present,
    /// creates the home layout, and attaches the persistent parse cache and
    /// proof ledger.
    pub fn open(root: &Path, home: ToolHome) -> anyhow::Result<Self> {
        let root = canonical_root(root).unwrap_or_else(|_| root.to_path_buf());
        let mut config = WardenConfig::load_or_default(&home.config_path())
            .with_context(|| format!("loading {}", home.config_path().display()))?;
        home.ensure()
            .with_context(|| format!("creating tool home {}", home.root().display()))?;
        // A home inside the project must never be walked, whatever its name.
        let home_dir = canonical_root(home.root()).unwrap_or_else(|_| home.root().to_path_buf());
        if home_dir.starts_with(&root) {
            config.excluded_dirs.push(home_dir);
        }

        let cache = ParseCache::persistent(&home.cache_dir())?;
        let host = ParserHost::new(cache, config.recovery_prefix_bytes)?;
        let ledger = ProofLedger::open(&home.ledger_path())?;
        let store = SnapshotStore::new(home.backups_dir(), &config)?;
        let filter = config.source_filter()?;
        tracing::debug!(root = %root.display(), home = %home.root().display(), "warden opened");

        Ok(Self {
            root,
            home,
            config,
            filter,
            host,
            registry: TransformationRegistry::new(ledger),
            store,
            resolver: Box::new(SuffixResolver),
            probe: Box::new(SystemProbe),
        })
    }

    pub fn with_probe(mut self, probe: Box<dyn HostProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_resolver(mut self, resolver: Box<dyn ImportResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn home(&self) -> &ToolHome {
        &self.home
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    pub fn registry(&self) -> &TransformationRegistry {
        &self.registry
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    fn preflight(&self, dry_run: bool) -> PreflightReport {
        run_checks(&self.root, &self.config, &self.store, self.probe.as_ref(), dry_run)
    }

    fn ensure_unblocked(preflight: &PreflightReport, force: bool) -> Result<(), WorkflowError> {
        let blocking = preflight.blocking();
        if blocking.is_empty() {
            return Ok(());
        }
        let checks: Vec<String> = blocking.iter().map(|c| c.name.to_string()).collect();
        if force {
            tracing::warn!(?checks, "pre-flight blocked; continuing because of --force");
            return Ok(());
        }
        Err(WorkflowError::Blocked { checks })
    }

    fn analyze(&mut self) -> anyhow::Result<ProjectAnalysis> {
        Ok(analyze_project(
            &self.root,
            &mut self.host,
            self.resolver.as_ref(),
            &self.config,
        )?)
    }

    fn root_display(&self) -> String {
        self.root.display().to_string()
    }

    pub fn scan(&mut self, options: ScanOptions) -> anyhow::Result<ScanReport> {
        tracing::info!(root = %self.root.display(), dry_run = options.dry_run, "scan started");
        let preflight = self.preflight(options.dry_run);
        let snapshot_id = if options.dry_run {
            None
        } else if preflight.is_blocked() && !options.force {
            tracing::warn!("pre-flight blocked; scan continues without a snapshot");
            None
        } else {
            Some(self.store.create(&self.root, "scan", "state at scan")?.id)
        };

        let analysis = self.analyze()?;
        tracing::info!(
            files = analysis.metrics.files,
            risk = ?analysis.summary.risk.level,
            "scan complete"
        );
        Ok(ScanReport {
            root: self.root_display(),
            timestamp_ms: common::now_millis(),
            dry_run: options.dry_run,
            preflight,
            snapshot_id,
            analysis,
            parse_metrics: self.host.metrics().clone(),
        })
    }

    /// Candidate rules per source file, in key order.
    fn candidates(&mut self) -> Vec<FixCandidate> {
        let mut candidates = Vec::new();
        for file in self.filter.walk_sources(&self.root) {
            let unit = match self.host.parse_file(&self.root, &file.relative) {
                Ok(unit) => unit,
                Err(e) => {
                    tracing::warn!(file = %file.relative, error = %e, "unreadable file skipped");
                    continue;
                }
            };
            candidates.extend(
                self.registry
                    .candidates(&unit)
                    .into_iter()
                    .map(|rule| FixCandidate {
                        file: file.relative.clone(),
                        rule,
                    }),
            );
        }
        candidates
    }

    pub fn fix(&mut self, options: FixOptions) -> anyhow::Result<FixReport> {
        tracing::info!(root = %self.root.display(), dry_run = options.dry_run, "fix started");
        let preflight = self.preflight(options.dry_run);
        if !options.dry_run {
            Self::ensure_unblocked(&preflight, options.force)?;
        }

        let before = self.analyze()?.summary;
        let candidates = self.candidates();
        tracing::info!(candidates = candidates.len(), "fix candidates collected");

        if options.dry_run {
            return Ok(FixReport {
                root: self.root_display(),
                timestamp_ms: common::now_millis(),
                dry_run: true,
                preflight,
                snapshot_id: None,
                before,
                after: None,
                candidates,
                outcomes: Vec::new(),
                files_written: Vec::new(),
            });
        }

        let snapshot = self.store.create(&self.root, "pre-fix", "state before fix")?;

        let mut outcomes = Vec::new();
        let mut files_written = Vec::new();
        let mut files: Vec<&str> = candidates.iter().map(|c| c.file.as_str()).collect();
        files.dedup();
        for relative in files {
            let path = self.root.join(relative);
            let original = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(file = relative, error = %e, "unreadable file skipped");
                    continue;
                }
            };
            let mut unit = self.host.parse(relative, &original);
            let mut ctx = TransformContext {
                file: relative.to_string(),
                source: original.clone(),
            };

            // Each rule sees the text left by the rules before it.
            let rule_ids: Vec<_> = self.registry.rules().map(|r| r.id()).collect();
            for rule_id in rule_ids {
                let applies = self
                    .registry
                    .rule(rule_id)
                    .is_some_and(|r| r.is_candidate(&unit));
                if !applies {
                    continue;
                }
                let outcome = self
                    .registry
                    .apply_transformation(rule_id, &unit, &ctx, &mut self.host);
                if let (Some(text), Some(after)) = (&outcome.new_source, &outcome.unit) {
                    ctx.source = text.clone();
                    unit = after.clone();
                }
                outcomes.push(outcome);
            }

            if ctx.source != original {
                write_replacing(&path, ctx.source.as_bytes())
                    .with_context(|| format!("writing {relative}"))?;
                tracing::info!(file = relative, "fixed");
                files_written.push(relative.to_string());
            }
        }

        let after = self.analyze()?.summary;
        tracing::info!(
            written = files_written.len(),
            risk_before = before.risk.score,
            risk_after = after.risk.score,
            "fix complete"
        );
        Ok(FixReport {
            root: self.root_display(),
            timestamp_ms: common::now_millis(),
            dry_run: false,
            preflight,
            snapshot_id: Some(snapshot.id),
            before,
            after: Some(after),
            candidates,
            outcomes,
            files_written,
        })
    }

    pub fn verify(&mut self) -> anyhow::Result<VerifyReport> {
        let ledger = self.registry.ledger();
        let (chain_valid, records_checked, chain_error) = match ledger.verify_chain() {
            Ok(n) => (true, n, None),
            Err(e) => {
                tracing::warn!(error = %e, "proof chain invalid");
                (false, 0, Some(e.to_string()))
            }
        };
        let summary = ledger.summary();
        let outstanding = self.candidates();
        tracing::info!(chain_valid, records = summary.total, outstanding = outstanding.len(), "verify complete");
        Ok(VerifyReport {
            timestamp_ms: common::now_millis(),
            chain_valid,
            records_checked,
            chain_error,
            ledger: summary,
            outstanding,
        })
    }

    pub fn rollback(&mut self, options: RollbackOptions) -> anyhow::Result<RollbackSummary> {
        let preflight = self.preflight(options.dry_run);
        if !options.dry_run {
            Self::ensure_unblocked(&preflight, options.force)?;
        }

        let target = match &options.snapshot_id {
            Some(id) => self.store.load(id)?,
            None => self
                .store
                .list()?
                .into_iter()
                .rev()
                .find(|s| s.tag != EMERGENCY_TAG)
                .ok_or(WorkflowError::NoSnapshot)?,
        };
        // The sample limit is for reports; a restore set must be complete.
        let diff = self.store.diff(&target, &self.root, None)?;
        let plan = RollbackPlan::from_diff(&target, &diff);
        tracing::info!(
            snapshot = %target.id,
            restore = plan.files_to_restore.len(),
            delete = plan.files_to_delete.len(),
            "rollback planned"
        );
        let report = execute_rollback(plan, &self.store, &self.root, options.dry_run)?;
        Ok(RollbackSummary {
            timestamp_ms: common::now_millis(),
            preflight,
            diff,
            report,
        })
    }

    pub fn status(&self) -> anyhow::Result<StatusReport> {
        let snapshots = self
            .store
            .list()?
            .into_iter()
            .map(|s| SnapshotInfo {
                files: s.files.len(),
                id: s.id,
                tag: s.tag,
                description: s.description,
                timestamp_ms: s.timestamp_ms,
                total_bytes: s.total_bytes,
            })
            .collect();
        Ok(StatusReport {
            root: self.root_display(),
            home: self.home.root().display().to_string(),
            timestamp_ms: common::now_millis(),
            snapshots,
            cache_entries: self.host.cache().len(),
            parse_metrics: self.host.metrics().clone(),
            rule_stats: self.registry.stats().clone(),
            ledger: self.registry.ledger().summary(),
        })
    }
}

/// Replaces `path` via a sibling temp file and a rename, so the file holds
/// either the old or the new content.
fn write_replacing(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{name}.warden-tmp-{}", std::process::id()));
    let written = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        if let Ok(meta) = fs::metadata(path) {
            fs::set_permissions(&tmp, meta.permissions())?;
        }
        fs::rename(&tmp, path)
    })();
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}
