//! # Import Extraction & Resolution
//!
//! Collects static (`import ... from`) and dynamic (`import()`, `require()`)
//! dependencies from a unit and resolves each specifier to a tree-relative
//! key through an [`ImportResolver`].

use std::path::Path;

use serde::Serialize;

use crate::path_util::{join_relative, parent_key};
use crate::patterns::string_value;
use crate::ParsedUnit;

/// Suffixes probed, in order, when resolving a specifier.
pub const RESOLVE_SUFFIXES: &[&str] = &[
    "",
    ".ts",
    ".tsx",
    ".js",
    ".jsx",
    ".mjs",
    ".cjs",
    "/index.ts",
    "/index.tsx",
    "/index.js",
    "/index.jsx",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportShape {
    Default,
    Named,
    Namespace,
    /// Default plus named or namespace.
    Mixed,
    /// `import './styles.css'`
    SideEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    Static,
    Dynamic,
}

/// Where a specifier points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "target", rename_all = "snake_case")]
pub enum Resolution {
    /// Tree-relative key of an existing file.
    Internal(String),
    /// Package name (`react`, `@scope/pkg`).
    External(String),
    /// Relative specifier with no matching file.
    Missing(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportRecord {
    pub source: String,
    pub resolution: Resolution,
    pub specifiers: Vec<String>,
    pub shape: ImportShape,
    pub kind: ImportKind,
    pub line: u32,
}

/// Maps an import specifier to a [`Resolution`].
///
/// Implementations must be pure with respect to the tree: same files, same
/// answer.
pub trait ImportResolver {
    fn resolve(&self, root: &Path, importer: &str, specifier: &str) -> Resolution;
}

/// Probes [`RESOLVE_SUFFIXES`] relative to the importing file's directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuffixResolver;

impl SuffixResolver {
    fn is_relative(specifier: &str) -> bool {
        specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
    }

    fn package_name(specifier: &str) -> String {
        let mut parts = specifier.split('/');
        match (parts.next(), parts.next()) {
            (Some(scope), Some(name)) if scope.starts_with('@') => format!("{scope}/{name}"),
            (Some(name), _) => name.to_string(),
            _ => specifier.to_string(),
        }
    }
}

impl ImportResolver for SuffixResolver {
    fn resolve(&self, root: &Path, importer: &str, specifier: &str) -> Resolution {
        if let Some(base) = join_relative(parent_key(importer), specifier) {
            for suffix in RESOLVE_SUFFIXES {
                let candidate = format!("{base}{suffix}");
                if !candidate.is_empty() && root.join(&candidate).is_file() {
                    return Resolution::Internal(candidate);
                }
            }
        }
        if Self::is_relative(specifier) {
            Resolution::Missing(specifier.to_string())
        } else {
            Resolution::External(Self::package_name(specifier))
        }
    }
}

/// Dependencies of `unit` in source order. Recovery units have none.
pub fn extract_dependencies(
    unit: &ParsedUnit,
    resolver: &dyn ImportResolver,
    root: &Path,
) -> Vec<ImportRecord> {
    let mut records = Vec::new();
    for idx in unit.preorder() {
        let raw = match unit.kind(idx) {
            "import_statement" => static_import(unit, idx),
            "export_statement" => reexport(unit, idx),
            "call_expression" => dynamic_import(unit, idx),
            _ => None,
        };
        if let Some((source, specifiers, shape, kind)) = raw {
            let resolution = resolver.resolve(root, &unit.file, &source);
            records.push(ImportRecord {
                source,
                resolution,
                specifiers,
                shape,
                kind,
                line: unit.node(idx).start_line,
            });
        }
    }
    records
}

type RawImport = (String, Vec<String>, ImportShape, ImportKind);

fn static_import(unit: &ParsedUnit, stmt: u32) -> Option<RawImport> {
    let source = string_value(unit, unit.child_by_field(stmt, "source")?);
    let Some(clause) = unit
        .named_children(stmt)
        .find(|&c| unit.kind(c) == "import_clause")
    else {
        return Some((source, Vec::new(), ImportShape::SideEffect, ImportKind::Static));
    };

    let mut specifiers = Vec::new();
    let (mut default, mut named, mut namespace) = (false, false, false);
    for part in unit.named_children(clause) {
        match unit.kind(part) {
            "identifier" => {
                default = true;
                specifiers.push(unit.text(part).to_string());
            }
            "namespace_import" => {
                namespace = true;
                specifiers.extend(unit.named_children(part).map(|n| unit.text(n).to_string()));
            }
            "named_imports" => {
                named = true;
                for spec in unit.named_children(part) {
                    let local = unit
                        .child_by_field(spec, "alias")
                        .or_else(|| unit.child_by_field(spec, "name"));
                    if let Some(n) = local {
                        specifiers.push(unit.text(n).to_string());
                    }
                }
            }
            _ => {}
        }
    }

    let shape = match (default, named || namespace) {
        (true, true) => ImportShape::Mixed,
        (true, false) => ImportShape::Default,
        (false, _) if namespace => ImportShape::Namespace,
        _ => ImportShape::Named,
    };
    Some((source, specifiers, shape, ImportKind::Static))
}

/// `export { a } from './a'` and `export * from './b'`.
fn reexport(unit: &ParsedUnit, stmt: u32) -> Option<RawImport> {
    let source = string_value(unit, unit.child_by_field(stmt, "source")?);
    let mut specifiers = Vec::new();
    for clause in unit
        .named_children(stmt)
        .filter(|&c| unit.kind(c) == "export_clause")
    {
        specifiers.extend(
            unit.named_children(clause)
                .filter_map(|s| unit.child_by_field(s, "name"))
                .map(|n| unit.text(n).to_string()),
        );
    }
    let shape = if specifiers.is_empty() {
        ImportShape::Namespace
    } else {
        ImportShape::Named
    };
    Some((source, specifiers, shape, ImportKind::Static))
}

/// `import('x')` or `require('x')` with a literal argument.
fn dynamic_import(unit: &ParsedUnit, call: u32) -> Option<RawImport> {
    let callee = unit.child_by_field(call, "function")?;
    if unit.kind(callee) != "import" && unit.text(callee) != "require" {
        return None;
    }
    let args = unit.child_by_field(call, "arguments")?;
    let first = unit.named_children(args).next()?;
    if unit.kind(first) != "string" {
        return None;
    }
    Some((
        string_value(unit, first),
        Vec::new(),
        ImportShape::Default,
        ImportKind::Dynamic,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParserHost;
    use std::fs;

    fn project() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("src/components/Button")).unwrap();
        fs::write(root.join("src/App.tsx"), "").ok();
        fs::write(root.join("src/util.js"), "").ok();
        fs::write(root.join("src/components/Button/index.tsx"), "").ok();
        tmp
    }

    #[test]
    fn test_suffix_resolution() {
        let tmp = project();
        let r = SuffixResolver;
        assert_eq!(
            r.resolve(tmp.path(), "src/App.tsx", "./util"),
            Resolution::Internal("src/util.js".into())
        );
        assert_eq!(
            r.resolve(tmp.path(), "src/App.tsx", "./components/Button"),
            Resolution::Internal("src/components/Button/index.tsx".into())
        );
        assert_eq!(
            r.resolve(tmp.path(), "src/App.tsx", "./gone"),
            Resolution::Missing("./gone".into())
        );
        assert_eq!(
            r.resolve(tmp.path(), "src/App.tsx", "@mui/material/Button"),
            Resolution::External("@mui/material".into())
        );
        assert_eq!(
            r.resolve(tmp.path(), "src/App.tsx", "react-dom/client"),
            Resolution::External("react-dom".into())
        );
    }

    #[test]
    fn test_bare_specifier_probes_importer_dir() {
        let tmp = project();
        assert_eq!(
            SuffixResolver.resolve(tmp.path(), "src/App.tsx", "util"),
            Resolution::Internal("src/util.js".into())
        );
    }

    #[test]
    fn test_extract_shapes_and_kinds() {
        let tmp = project();
        let mut host = ParserHost::in_memory().unwrap();
        let unit = host.parse(
            "src/App.tsx",
            "import React, { useState as useS } from 'react';\n\
             import * as U from './util';\n\
             import './styles.css';\n\
             export { Button } from './components/Button';\n\
             const Lazy = import('./Lazy');\n\
             const cfg = require('./config');\n",
        );
        let deps = extract_dependencies(&unit, &SuffixResolver, tmp.path());
        assert_eq!(deps.len(), 6);

        assert_eq!(deps[0].shape, ImportShape::Mixed);
        assert_eq!(deps[0].specifiers, vec!["React", "useS"]);
        assert_eq!(deps[0].resolution, Resolution::External("react".into()));

        assert_eq!(deps[1].shape, ImportShape::Namespace);
        assert_eq!(deps[1].resolution, Resolution::Internal("src/util.js".into()));

        assert_eq!(deps[2].shape, ImportShape::SideEffect);
        assert_eq!(deps[3].specifiers, vec!["Button"]);

        assert_eq!(deps[4].kind, ImportKind::Dynamic);
        assert_eq!(deps[4].line, 5);
        assert_eq!(deps[5].resolution, Resolution::Missing("./config".into()));
    }

    #[test]
    fn test_recovery_unit_has_no_dependencies() {
        let tmp = project();
        let mut host = ParserHost::in_memory().unwrap();
        let unit = host.parse("src/bad.js", "Totally not valid code here.\nimport x from './x';");
        assert!(extract_dependencies(&unit, &SuffixResolver, tmp.path()).is_empty());
    }
}
