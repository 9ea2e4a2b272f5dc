//! Report bodies returned by each workflow and written to
//! `<tool-home>/reports/` by the binary.

use std::collections::BTreeMap;

use anatomist::ParseMetrics;
use forge::{RuleId, RuleStats, TransformOutcome};
use oracle::{AnalysisSummary, ProjectAnalysis};
use serde::Serialize;
use shadow::{PreflightReport, RollbackReport, SnapshotDiff};
use vault::LedgerSummary;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixCandidate {
    pub file: String,
    pub rule: RuleId,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub root: String,
    pub timestamp_ms: u64,
    pub dry_run: bool,
    pub preflight: PreflightReport,
    pub snapshot_id: Option<String>,
    pub analysis: ProjectAnalysis,
    pub parse_metrics: ParseMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct FixReport {
    pub root: String,
    pub timestamp_ms: u64,
    pub dry_run: bool,
    pub preflight: PreflightReport,
    pub snapshot_id: Option<String>,
    pub before: AnalysisSummary,
    /// Re-analysis after files were written.
    pub after: Option<AnalysisSummary>,
    pub candidates: Vec<FixCandidate>,
    pub outcomes: Vec<TransformOutcome>,
    pub files_written: Vec<String>,
}

impl FixReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub timestamp_ms: u64,
    pub chain_valid: bool,
    pub records_checked: usize,
    pub chain_error: Option<String>,
    pub ledger: LedgerSummary,
    /// Defects still present in the tree.
    pub outstanding: Vec<FixCandidate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackSummary {
    pub timestamp_ms: u64,
    pub preflight: PreflightReport,
    pub diff: SnapshotDiff,
    pub report: RollbackReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub id: String,
    pub tag: String,
    pub description: String,
    pub timestamp_ms: u64,
    pub files: usize,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub root: String,
    pub home: String,
    pub timestamp_ms: u64,
    pub snapshots: Vec<SnapshotInfo>,
    pub cache_entries: usize,
    pub parse_metrics: ParseMetrics,
    pub rule_stats: BTreeMap<RuleId, RuleStats>,
    pub ledger: LedgerSummary,
}
