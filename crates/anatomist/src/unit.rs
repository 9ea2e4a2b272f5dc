//! Arena-encoded parse results.
//!
//! A [`ParsedUnit`] owns its source text and a flat `Vec<SyntaxNode>`; nodes
//! refer to each other by `u32` index. Index `0` is the root whenever the
//! arena is non-empty, and every parent precedes its children.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// Grammar used to produce a tree, tried in declaration order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Deserialize,
    Serialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[rkyv(derive(Debug))]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ParseStrategy {
    Tsx,
    TypeScript,
    JavaScript,
}

impl ParseStrategy {
    /// Fixed attempt order: the most permissive grammar first.
    pub const ORDER: [ParseStrategy; 3] = [Self::Tsx, Self::TypeScript, Self::JavaScript];

    pub fn language(self) -> tree_sitter::Language {
        match self {
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Tsx => "tsx",
            Self::TypeScript => "typescript",
            Self::JavaScript => "javascript",
        }
    }
}

/// One parse problem, 1-based line and 0-based column.
#[derive(
    Debug, Clone, PartialEq, Eq, Archive, Deserialize, Serialize, SerdeSerialize, SerdeDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct ParseIssue {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

/// Payload of a unit that no strategy could parse cleanly.
#[derive(
    Debug, Clone, PartialEq, Eq, Archive, Deserialize, Serialize, SerdeSerialize, SerdeDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct Recovery {
    /// Last strategy's first error message (never empty).
    pub message: String,
    pub line: u32,
    pub column: u32,
    /// Byte length of the retained source prefix.
    pub prefix_len: u32,
    /// `true` if the prefix is shorter than the original text.
    pub truncated: bool,
}

/// A single syntax-tree node.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Deserialize, Serialize)]
#[rkyv(derive(Debug))]
pub struct SyntaxNode {
    pub kind: String,
    /// `false` for anonymous tokens such as `(` or `import`.
    pub named: bool,
    /// Field name under which the parent holds this node (`source`, `name`, ...).
    pub field: Option<String>,
    pub start_byte: u32,
    pub end_byte: u32,
    /// 1-based.
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub parent: Option<u32>,
    pub children: Vec<u32>,
}

/// Immutable result of parsing one file.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Deserialize, Serialize)]
#[rkyv(derive(Debug))]
pub struct ParsedUnit {
    /// Tree-relative key of the file.
    pub file: String,
    /// Content-addressed cache key.
    pub key: String,
    /// `None` for recovery units.
    pub strategy: Option<ParseStrategy>,
    /// Full text for parsed units, a bounded prefix for recovery units.
    pub source: String,
    pub nodes: Vec<SyntaxNode>,
    pub errors: Vec<ParseIssue>,
    pub recovery: Option<Recovery>,
}

impl ParsedUnit {
    pub fn is_recovery(&self) -> bool {
        self.recovery.is_some()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Root index, `None` for recovery units.
    pub fn root(&self) -> Option<u32> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(0)
        }
    }

    pub fn node(&self, idx: u32) -> &SyntaxNode {
        &self.nodes[idx as usize]
    }

    pub fn kind(&self, idx: u32) -> &str {
        &self.nodes[idx as usize].kind
    }

    /// Source text covered by a node. Empty if the range is not valid UTF-8
    /// boundaries of the stored source.
    pub fn text(&self, idx: u32) -> &str {
        let n = &self.nodes[idx as usize];
        self.source
            .get(n.start_byte as usize..n.end_byte as usize)
            .unwrap_or_default()
    }

    pub fn parent(&self, idx: u32) -> Option<u32> {
        self.nodes[idx as usize].parent
    }

    pub fn children(&self, idx: u32) -> &[u32] {
        &self.nodes[idx as usize].children
    }

    pub fn named_children(&self, idx: u32) -> impl Iterator<Item = u32> + '_ {
        self.children(idx)
            .iter()
            .copied()
            .filter(|&c| self.nodes[c as usize].named)
    }

    /// First child held under `field`.
    pub fn child_by_field(&self, idx: u32, field: &str) -> Option<u32> {
        self.children(idx)
            .iter()
            .copied()
            .find(|&c| self.nodes[c as usize].field.as_deref() == Some(field))
    }

    /// Ancestors from the parent up to the root.
    pub fn ancestors(&self, idx: u32) -> impl Iterator<Item = u32> + '_ {
        std::iter::successors(self.parent(idx), move |&p| self.parent(p))
    }

    /// Pre-order index sequence via an explicit stack.
    pub fn preorder(&self) -> Vec<u32> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<u32> = self.root().into_iter().collect();
        while let Some(idx) = stack.pop() {
            order.push(idx);
            stack.extend(self.children(idx).iter().rev());
        }
        order
    }

    /// All node indices of the given kind, in pre-order.
    pub fn nodes_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = u32> + 'a {
        self.preorder()
            .into_iter()
            .filter(move |&i| self.nodes[i as usize].kind == kind)
    }
}
