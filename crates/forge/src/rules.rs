//! The transformation rule trait and the built-in rule table.

use std::fmt;
use std::str::FromStr;

use anatomist::patterns::{interpolation_hazards, string_value, RENDER_BINDING, RENDER_LIBRARY};
use anatomist::{stray_text_lines, ParsedUnit};
use serde::{Deserialize, Serialize};
use vault::{TheoremId, VerificationResult, Verifier};

use crate::edit::TextEdit;
use crate::ForgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleId {
    StrayTextToComment,
    EnsureRenderImport,
    InterpolateAttribute,
}

impl RuleId {
    pub const ALL: [RuleId; 3] = [
        Self::StrayTextToComment,
        Self::EnsureRenderImport,
        Self::InterpolateAttribute,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StrayTextToComment => "stray-text-to-comment",
            Self::EnsureRenderImport => "ensure-render-import",
            Self::InterpolateAttribute => "interpolate-attribute",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleId {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| ForgeError::UnknownRule(s.to_string()))
    }
}

/// The file a transformation runs against.
#[derive(Debug, Clone)]
pub struct TransformContext {
    /// Tree-relative key.
    pub file: String,
    /// Full current text (a recovery unit only holds a prefix).
    pub source: String,
}

/// A named, self-verifying source transformation.
pub trait TransformationRule: Send + Sync {
    fn id(&self) -> RuleId;
    fn name(&self) -> &'static str;
    fn theorem(&self) -> TheoremId;
    fn proof_statement(&self) -> &'static str;

    /// Edits over `ctx.source`. An empty list is a no-op.
    fn apply(&self, unit: &ParsedUnit, ctx: &TransformContext) -> Result<Vec<TextEdit>, ForgeError>;

    fn verify(&self, before: &ParsedUnit, after: &ParsedUnit) -> VerificationResult {
        Verifier.verify(self.theorem(), before, after)
    }

    /// `unit` exhibits the defect this rule repairs.
    fn is_candidate(&self, unit: &ParsedUnit) -> bool {
        self.theorem().pattern_present(unit)
    }
}

/// Built-in rules in `RuleId::ALL` order.
pub fn builtin_rules() -> Vec<Box<dyn TransformationRule>> {
    vec![
        Box::new(StrayTextToComment),
        Box::new(EnsureRenderImport),
        Box::new(InterpolateAttribute),
    ]
}

// ---------------------------------------------------------------------------
// stray-text-to-comment
// ---------------------------------------------------------------------------

pub struct StrayTextToComment;

impl TransformationRule for StrayTextToComment {
    fn id(&self) -> RuleId {
        RuleId::StrayTextToComment
    }

    fn name(&self) -> &'static str {
        "Comment out stray prose"
    }

    fn theorem(&self) -> TheoremId {
        TheoremId::StrayText
    }

    fn proof_statement(&self) -> &'static str {
        "A line comment is ignored by every grammar, so commenting a prose line removes its \
         parse error without changing program behavior."
    }

    fn apply(&self, unit: &ParsedUnit, ctx: &TransformContext) -> Result<Vec<TextEdit>, ForgeError> {
        if !unit.has_errors() {
            return Ok(Vec::new());
        }
        Ok(stray_text_lines(&ctx.source)
            .into_iter()
            .map(|line| TextEdit::insert(line.start_byte, "// "))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// ensure-render-import
// ---------------------------------------------------------------------------

pub struct EnsureRenderImport;

impl EnsureRenderImport {
    /// Start of an existing `react` import clause that can take a default
    /// binding in front (named or namespace only).
    fn extendable_clause(unit: &ParsedUnit) -> Option<usize> {
        unit.nodes_of_kind("import_statement").find_map(|stmt| {
            let source = unit.child_by_field(stmt, "source")?;
            if string_value(unit, source) != RENDER_LIBRARY {
                return None;
            }
            let clause = unit
                .named_children(stmt)
                .find(|&c| unit.kind(c) == "import_clause")?;
            let first = unit.named_children(clause).next()?;
            matches!(unit.kind(first), "named_imports" | "namespace_import")
                .then(|| unit.node(clause).start_byte as usize)
        })
    }

    /// Offset just past the hashbang and directive prologue (`'use client';`).
    fn prologue_end(unit: &ParsedUnit, source: &str) -> usize {
        let Some(root) = unit.root() else {
            return 0;
        };
        let mut end = 0;
        for stmt in unit.named_children(root) {
            let is_directive = match unit.kind(stmt) {
                "hash_bang_line" => true,
                "expression_statement" => {
                    let mut inner = unit.named_children(stmt);
                    matches!(inner.next(), Some(s) if unit.kind(s) == "string")
                        && inner.next().is_none()
                }
                "comment" => continue,
                _ => false,
            };
            if !is_directive {
                break;
            }
            end = unit.node(stmt).end_byte as usize;
        }
        if end == 0 {
            return 0;
        }
        // Insert on the following line.
        source[end..]
            .find('\n')
            .map(|n| end + n + 1)
            .unwrap_or(source.len())
    }
}

impl TransformationRule for EnsureRenderImport {
    fn id(&self) -> RuleId {
        RuleId::EnsureRenderImport
    }

    fn name(&self) -> &'static str {
        "Bind React for markup"
    }

    fn theorem(&self) -> TheoremId {
        TheoremId::RenderBinding
    }

    fn proof_statement(&self) -> &'static str {
        "Markup compiles to calls on the React binding; importing the default export of \
         'react' puts that binding in module scope."
    }

    fn apply(&self, unit: &ParsedUnit, ctx: &TransformContext) -> Result<Vec<TextEdit>, ForgeError> {
        if !self.is_candidate(unit) {
            return Ok(Vec::new());
        }
        if let Some(at) = Self::extendable_clause(unit) {
            return Ok(vec![TextEdit::insert(at, format!("{RENDER_BINDING}, "))]);
        }
        let at = Self::prologue_end(unit, &ctx.source);
        let mut line = format!("import {RENDER_BINDING} from '{RENDER_LIBRARY}';\n");
        if at == ctx.source.len() && !ctx.source.is_empty() && !ctx.source.ends_with('\n') {
            line.insert(0, '\n');
        }
        Ok(vec![TextEdit::insert(at, line)])
    }
}

// ---------------------------------------------------------------------------
// interpolate-attribute
// ---------------------------------------------------------------------------

pub struct InterpolateAttribute;

/// Quoted-string body as a template literal body: quote escapes dropped,
/// backticks escaped.
fn to_template_body(body: &str) -> String {
    let mut out = String::with_capacity(body.len() + 2);
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some('\'') | Some('"') => {
                    if let Some(q) = chars.next() {
                        out.push(q);
                    }
                }
                Some(&next) => {
                    out.push('\\');
                    out.push(next);
                    chars.next();
                }
                None => out.push('\\'),
            },
            '`' => out.push_str("\\`"),
            other => out.push(other),
        }
    }
    out
}

impl TransformationRule for InterpolateAttribute {
    fn id(&self) -> RuleId {
        RuleId::InterpolateAttribute
    }

    fn name(&self) -> &'static str {
        "Quoted placeholder to template literal"
    }

    fn theorem(&self) -> TheoremId {
        TheoremId::TemplateInterpolation
    }

    fn proof_statement(&self) -> &'static str {
        "Only template literals evaluate `${}`; rewriting the quoted string as a template \
         literal makes the placeholder interpolate."
    }

    fn apply(&self, unit: &ParsedUnit, _ctx: &TransformContext) -> Result<Vec<TextEdit>, ForgeError> {
        Ok(interpolation_hazards(unit)
            .into_iter()
            .map(|hazard| {
                let node = unit.node(hazard.node);
                let literal = format!("`{}`", to_template_body(&string_value(unit, hazard.node)));
                let replacement = if hazard.in_attribute {
                    format!("{{{literal}}}")
                } else {
                    literal
                };
                TextEdit::replace(node.start_byte as usize, node.end_byte as usize, replacement)
            })
            .collect())
    }
}
