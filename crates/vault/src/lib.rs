//! # The Vault: Theorem Verification & Proof Ledger
//!
//! Gates every transformation. A fixed catalogue of [`TheoremId`]s describes
//! the defects the engine knows how to repair; the [`Verifier`] checks a
//! before/after pair of parsed units against one theorem, and the
//! [`ProofLedger`] keeps an append-only, hash-chained audit trail of every
//! verdict.
//!
//! ## Success rule
//! A verification passes when the theorem's pattern was present before, is
//! gone after and the corrective marker is in place (or the pattern was never
//! present), and the after-unit has no more parse errors than the before-unit.

pub mod ledger;
pub mod theorem;
pub mod verifier;

pub use ledger::{LedgerSummary, ProofLedger, ProofRecord, GENESIS_HASH};
pub use theorem::{Theorem, TheoremId};
pub use verifier::{VerificationResult, Verifier};

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Unknown theorem: {0}")]
    UnknownTheorem(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Corrupt ledger line {line}: {reason}")]
    CorruptLedger { line: usize, reason: String },

    #[error("Proof chain broken at record {index}: {reason}")]
    ChainBroken { index: usize, reason: String },
}
