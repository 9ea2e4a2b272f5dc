//! # The Anatomist: Multi-Strategy Parsing & Structural Facts
//!
//! **Role**: Turns JavaScript/TypeScript source text into immutable
//! [`ParsedUnit`]s and answers read-only structural questions about them.
//!
//! **Core Types**:
//! - `ParsedUnit`: arena-encoded syntax tree (nodes addressed by `u32` index),
//!   parse issues, and an optional recovery payload.
//! - `ParserHost`: ordered strategy list (TSX → TypeScript → JavaScript) in
//!   front of a content-addressed [`cache::ParseCache`].
//! - `ImportResolver`: plug point mapping import specifiers to tree paths.
//!
//! **Design**:
//! - `parse` never fails. A file no strategy can parse cleanly degrades to a
//!   recovery unit carrying the last error and a bounded prefix of the text.
//! - All traversals are explicit worklists over arena indices; nothing
//!   recurses on tree depth.
//! - Units derive `rkyv` `Archive` for the on-disk cache; report-facing types
//!   also derive `serde`.

pub mod cache;
pub mod imports;
pub mod parser;
pub mod path_util;
pub mod patterns;
pub mod prose;
pub mod unit;

pub use cache::ParseCache;
pub use imports::{
    extract_dependencies, ImportKind, ImportRecord, ImportResolver, ImportShape, Resolution,
    SuffixResolver,
};
pub use parser::{ParseMetrics, ParseStrategy, ParserHost};
pub use patterns::{detect_patterns, structural_metrics, PatternReport, StructuralMetrics};
pub use prose::{stray_text_lines, StrayLine};
pub use unit::{ParseIssue, ParsedUnit, Recovery, SyntaxNode};

/// Errors produced by the Anatomist crate.
#[derive(Debug, thiserror::Error)]
pub enum AnatomistError {
    /// A tree-sitter grammar could not be loaded.
    #[error("Grammar load failure: {0}")]
    GrammarFailure(String),

    /// I/O error (file read/write).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Cache archive could not be written or validated.
    #[error("Cache error: {0}")]
    CacheError(String),

    /// Byte range exceeds u32::MAX (file too large).
    #[error("Byte range overflow: file size exceeds 4GB limit")]
    ByteRangeOverflow,
}
