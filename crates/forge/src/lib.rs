//! # The Forge: Transformation Registry
//!
//! Narrowly scoped source rewrites, each tied to one vault theorem.
//!
//! A rule only proposes [`TextEdit`]s. The [`TransformationRegistry`] splices
//! them bottom-to-top into the current text, reparses the result through the
//! shared [`anatomist::ParserHost`] and hands the before/after pair to the
//! rule's verifier. New text is released only when verification passes, and
//! every attempt is written to the proof ledger.

pub mod edit;
pub mod registry;
pub mod rules;

pub use edit::{apply_edits, TextEdit};
pub use registry::{RuleStats, TransformFailure, TransformOutcome, TransformationRegistry};
pub use rules::{
    builtin_rules, EnsureRenderImport, InterpolateAttribute, RuleId, StrayTextToComment,
    TransformContext, TransformationRule,
};

#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("Unknown rule: {0}")]
    UnknownRule(String),

    #[error("Edit {start}..{end} out of bounds for text of {len} bytes")]
    EditOutOfBounds { start: usize, end: usize, len: usize },

    #[error("Edit {start}..{end} overlaps a later edit")]
    OverlappingEdits { start: usize, end: usize },

    #[error("Rule failed: {0}")]
    RuleFailed(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] vault::VaultError),
}
