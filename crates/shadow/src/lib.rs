//! # The Shadow: Snapshots, Diffs and Rollback
//!
//! Transactional safety for the live tree. Nothing in this crate writes to a
//! project except [`execute_rollback`], and that only after its own
//! emergency snapshot exists.
//!
//! Per snapshot: `created -> diffed -> rollback-planned -> rolled-back`, or
//! discarded by retention.

pub mod preflight;
pub mod rollback;
pub mod snapshot;

pub use preflight::{
    run_checks, CheckResult, CheckSeverity, HostProbe, PreflightReport, Remediation, SystemProbe,
};
pub use rollback::{
    execute_rollback, RollbackPlan, RollbackReport, RollbackStep, StepAction, TransactionEntry,
    TransactionLog,
};
pub use snapshot::{EvictionReport, Snapshot, SnapshotDiff, SnapshotStore};

/// Errors from snapshot and rollback operations.
#[derive(Debug, thiserror::Error)]
pub enum ShadowError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] common::ConfigError),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Corrupt manifest for snapshot {id}: {reason}")]
    CorruptManifest { id: String, reason: String },

    #[error("Unsafe path in snapshot: {0}")]
    InvalidPath(String),

    #[error("Emergency snapshot would not protect: {}", missing.join(", "))]
    EmergencyIncomplete { missing: Vec<String> },

    #[error("Rollback failed ({reason}); emergency snapshot {emergency_snapshot_id} holds the pre-rollback state")]
    RollbackFailed {
        emergency_snapshot_id: String,
        reason: String,
    },
}
