//! Structural metrics and pattern detection over a [`ParsedUnit`].
//!
//! Every function here is a read-only worklist pass over the arena. Recovery
//! units have no tree and yield empty results, except where a lexical
//! fallback exists (stray prose).

use std::sync::OnceLock;

use aho_corasick::{AhoCorasick, MatchKind};
use serde::Serialize;

use crate::ParsedUnit;

/// Callee prefixes whose invocation at module scope is a load-time side effect.
const SENSITIVE_APIS: &[&str] = &[
    "fetch",
    "XMLHttpRequest",
    "localStorage.",
    "sessionStorage.",
    "indexedDB.",
    "navigator.",
    "document.addEventListener",
    "window.addEventListener",
    "document.cookie",
    "setInterval",
    "setTimeout",
    "process.exit",
];

/// Node kinds that open a new (non-module) execution scope.
const SCOPE_KINDS: &[&str] = &[
    "function_declaration",
    "function_expression",
    "function",
    "generator_function_declaration",
    "generator_function",
    "arrow_function",
    "method_definition",
    "class_body",
];

/// Packages whose default or namespace import binds the JSX factory.
pub const RENDER_LIBRARY: &str = "react";
pub const RENDER_BINDING: &str = "React";

static SENSITIVE_MATCHER: OnceLock<Option<AhoCorasick>> = OnceLock::new();

fn sensitive_matcher() -> Option<&'static AhoCorasick> {
    SENSITIVE_MATCHER
        .get_or_init(|| {
            AhoCorasick::builder()
                .match_kind(MatchKind::LeftmostLongest)
                .build(SENSITIVE_APIS)
                .map_err(|e| tracing::error!(error = %e, "sensitive API matcher failed to build"))
                .ok()
        })
        .as_ref()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructuralMetrics {
    pub node_count: usize,
    pub max_depth: usize,
    pub error_count: usize,
}

/// Pattern facts consumed by the graph builder and the theorems.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatternReport {
    /// JSX elements (paired and self-closing).
    pub markup_elements: usize,
    /// `useXxx(...)` call sites.
    pub hook_calls: Vec<String>,
    /// Specifiers of `import ... from` statements.
    pub static_imports: Vec<String>,
    /// Literal specifiers of `import()` and `require()`.
    pub dynamic_imports: Vec<String>,
    /// Exported names; `default` for default exports.
    pub exports: Vec<String>,
    /// Callee text of sensitive calls outside every function scope.
    pub side_effect_calls: Vec<String>,
    /// `React` is bound by import or `require('react')`.
    pub binds_render_library: bool,
}

impl PatternReport {
    pub fn has_markup(&self) -> bool {
        self.markup_elements > 0
    }
}

pub fn structural_metrics(unit: &ParsedUnit) -> StructuralMetrics {
    let mut max_depth = 0;
    let mut stack: Vec<(u32, usize)> = unit.root().map(|r| (r, 1)).into_iter().collect();
    while let Some((idx, depth)) = stack.pop() {
        max_depth = max_depth.max(depth);
        stack.extend(unit.children(idx).iter().map(|&c| (c, depth + 1)));
    }
    StructuralMetrics {
        node_count: unit.nodes.len(),
        max_depth,
        error_count: unit.errors.len(),
    }
}

pub fn detect_patterns(unit: &ParsedUnit) -> PatternReport {
    let mut report = PatternReport::default();

    for idx in unit.preorder() {
        match unit.kind(idx) {
            "jsx_element" | "jsx_self_closing_element" => report.markup_elements += 1,
            "import_statement" => {
                if let Some(source) = unit.child_by_field(idx, "source") {
                    report.static_imports.push(string_value(unit, source));
                }
                if import_binds_render(unit, idx) {
                    report.binds_render_library = true;
                }
            }
            "export_statement" => report.exports.extend(exported_names(unit, idx)),
            "call_expression" | "new_expression" => {
                let Some(callee) = callee(unit, idx) else {
                    continue;
                };
                let callee_text = unit.text(callee);
                if unit.kind(callee) == "import" || callee_text == "require" {
                    let target = require_target(unit, idx);
                    if callee_text == "require"
                        && target == Some(RENDER_LIBRARY)
                        && declared_name(unit, idx) == Some(RENDER_BINDING)
                    {
                        report.binds_render_library = true;
                    }
                    if let Some(t) = target {
                        report.dynamic_imports.push(t.to_string());
                    }
                }
                if let Some(hook) = hook_name(callee_text) {
                    report.hook_calls.push(hook.to_string());
                }
                if is_sensitive(callee_text) && at_module_scope(unit, idx) {
                    report.side_effect_calls.push(callee_text.to_string());
                }
            }
            _ => {}
        }
    }
    report
}

/// `string` nodes (not import sources) containing a `${` placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterpolationHazard {
    pub node: u32,
    pub line: u32,
    /// Parent is a JSX attribute (`title="${x}"`).
    pub in_attribute: bool,
}

pub fn interpolation_hazards(unit: &ParsedUnit) -> Vec<InterpolationHazard> {
    unit.nodes_of_kind("string")
        .filter(|&idx| unit.node(idx).field.as_deref() != Some("source"))
        .filter(|&idx| unit.text(idx).contains("${"))
        .map(|idx| InterpolationHazard {
            node: idx,
            line: unit.node(idx).start_line,
            in_attribute: unit
                .parent(idx)
                .is_some_and(|p| unit.kind(p) == "jsx_attribute"),
        })
        .collect()
}

/// `template_string` nodes carrying at least one substitution.
pub fn interpolated_templates(unit: &ParsedUnit) -> usize {
    unit.nodes_of_kind("template_string")
        .filter(|&idx| {
            unit.children(idx)
                .iter()
                .any(|&c| unit.kind(c) == "template_substitution")
        })
        .count()
}

fn callee(unit: &ParsedUnit, call: u32) -> Option<u32> {
    unit.child_by_field(call, "function")
        .or_else(|| unit.child_by_field(call, "constructor"))
}

fn hook_name(callee_text: &str) -> Option<&str> {
    let name = callee_text.rsplit('.').next()?;
    let rest = name.strip_prefix("use")?;
    rest.chars()
        .next()
        .is_some_and(|c| c.is_ascii_uppercase())
        .then_some(name)
}

fn is_sensitive(callee_text: &str) -> bool {
    let Some(matcher) = sensitive_matcher() else {
        return false;
    };
    let Some(m) = matcher.find(callee_text) else {
        return false;
    };
    if m.start() != 0 {
        return false;
    }
    // `fetch` must not match `fetchUser`; dotted prefixes already end on a boundary.
    let matched = &callee_text[..m.end()];
    matched.ends_with('.')
        || callee_text[m.end()..]
            .chars()
            .next()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_' || c == '$'))
}

fn at_module_scope(unit: &ParsedUnit, idx: u32) -> bool {
    !unit
        .ancestors(idx)
        .any(|a| SCOPE_KINDS.contains(&unit.kind(a)))
}

/// Unquoted text of a string literal node.
pub fn string_value(unit: &ParsedUnit, idx: u32) -> String {
    let raw = unit.text(idx);
    raw.get(1..raw.len().saturating_sub(1))
        .unwrap_or_default()
        .to_string()
}

fn import_binds_render(unit: &ParsedUnit, stmt: u32) -> bool {
    let Some(source) = unit.child_by_field(stmt, "source") else {
        return false;
    };
    if string_value(unit, source) != RENDER_LIBRARY {
        return false;
    }
    let Some(clause) = unit
        .named_children(stmt)
        .find(|&c| unit.kind(c) == "import_clause")
    else {
        return false;
    };
    unit.named_children(clause).any(|c| match unit.kind(c) {
        "identifier" => unit.text(c) == RENDER_BINDING,
        "namespace_import" => unit
            .named_children(c)
            .any(|n| unit.text(n) == RENDER_BINDING),
        _ => false,
    })
}

fn require_target(unit: &ParsedUnit, call: u32) -> Option<&str> {
    let args = unit.child_by_field(call, "arguments")?;
    let first = unit.named_children(args).next()?;
    if unit.kind(first) != "string" {
        return None;
    }
    let raw = unit.text(first);
    raw.get(1..raw.len().saturating_sub(1))
}

/// Name bound by `const <name> = <call>`.
fn declared_name(unit: &ParsedUnit, call: u32) -> Option<&str> {
    let declarator = unit.parent(call)?;
    if unit.kind(declarator) != "variable_declarator" {
        return None;
    }
    unit.child_by_field(declarator, "name").map(|n| unit.text(n))
}

fn exported_names(unit: &ParsedUnit, stmt: u32) -> Vec<String> {
    if unit.children(stmt).iter().any(|&c| unit.kind(c) == "default") {
        return vec!["default".to_string()];
    }
    if let Some(decl) = unit.child_by_field(stmt, "declaration") {
        if let Some(name) = unit.child_by_field(decl, "name") {
            return vec![unit.text(name).to_string()];
        }
        // `export const a = 1, b = 2;`
        return unit
            .named_children(decl)
            .filter(|&c| unit.kind(c) == "variable_declarator")
            .filter_map(|c| unit.child_by_field(c, "name"))
            .map(|n| unit.text(n).to_string())
            .collect();
    }
    let mut names = Vec::new();
    for clause in unit
        .named_children(stmt)
        .filter(|&c| unit.kind(c) == "export_clause")
    {
        for spec in unit.named_children(clause) {
            let name = unit
                .child_by_field(spec, "alias")
                .or_else(|| unit.child_by_field(spec, "name"));
            if let Some(n) = name {
                names.push(unit.text(n).to_string());
            }
        }
    }
    names
}
