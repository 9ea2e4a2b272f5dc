//! # The Oracle: Project Import Graph & Risk Model
//!
//! Turns a source tree into an [`ImportGraph`] and derives everything the
//! orchestrator reports about it: import cycles, entry points, per-entry
//! critical paths, vulnerability points, a three-phase execution plan and a
//! risk score.
//!
//! Nodes live in an arena sorted by id; a petgraph `DiGraph` mirrors the
//! arena index for index, so every traversal here is index-based.

pub mod analysis;
pub mod classify;
pub mod cycles;
pub mod graph;
pub mod risk;

pub use analysis::{
    analyze_project, AnalysisSummary, CriticalNode, CriticalPath, CriticalReason, GraphMetrics,
    ProjectAnalysis,
};
pub use classify::{classify, is_entry_point, NodeKind};
pub use cycles::{detect_cycles, Cycle};
pub use graph::{EdgeTarget, GraphEdge, GraphNode, ImportGraph, EXTERNAL_PREFIX};
pub use risk::{
    ExecutionPlan, PlanPhase, RiskAssessment, RiskFactors, RiskLevel, Severity, VulnerabilityKind,
    VulnerabilityPoint,
};

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Configuration error: {0}")]
    Config(#[from] common::ConfigError),
}
