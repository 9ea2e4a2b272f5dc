//! Path and filename heuristics for node kinds and entry points.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Entry,
    Provider,
    Context,
    Component,
    Route,
    Hook,
    Utility,
    Module,
}

/// File stems that mark an entry point regardless of kind.
const ENTRY_STEMS: &[&str] = &["main", "App", "_app", "_document", "server"];

struct PathParts<'a> {
    dirs: Vec<&'a str>,
    stem: &'a str,
}

fn split(id: &str) -> PathParts<'_> {
    let mut dirs: Vec<&str> = id.split('/').collect();
    let file = dirs.pop().unwrap_or_default();
    let stem = file.split('.').next().unwrap_or(file);
    PathParts { dirs, stem }
}

fn in_dir(parts: &PathParts<'_>, names: &[&str]) -> bool {
    parts.dirs.iter().any(|d| names.contains(d))
}

fn is_hook_name(stem: &str) -> bool {
    stem.strip_prefix("use")
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_uppercase())
}

/// First matching rule wins.
pub fn classify(id: &str, has_markup: bool) -> NodeKind {
    let parts = split(id);
    let stem = parts.stem;
    let depth = parts.dirs.len();

    if ((stem == "index" || stem == "main") && depth <= 1) || stem == "_app" || stem == "_document"
    {
        NodeKind::Entry
    } else if stem.contains("Provider") || in_dir(&parts, &["providers"]) {
        NodeKind::Provider
    } else if stem.contains("Context") || in_dir(&parts, &["context", "contexts"]) {
        NodeKind::Context
    } else if is_hook_name(stem) || in_dir(&parts, &["hooks"]) {
        NodeKind::Hook
    } else if in_dir(&parts, &["pages", "routes"])
        || stem.contains("Router")
        || stem.to_ascii_lowercase().contains("route")
    {
        NodeKind::Route
    } else if in_dir(&parts, &["components"])
        || (has_markup && stem.chars().next().is_some_and(|c| c.is_ascii_uppercase()))
    {
        NodeKind::Component
    } else if in_dir(&parts, &["utils", "lib", "helpers"]) {
        NodeKind::Utility
    } else {
        NodeKind::Module
    }
}

/// `kind == Entry` or a conventional entry filename.
pub fn is_entry_point(id: &str, kind: NodeKind) -> bool {
    kind == NodeKind::Entry || ENTRY_STEMS.contains(&split(id).stem)
}
