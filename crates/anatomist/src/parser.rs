//! Multi-strategy tree-sitter parsing.
//!
//! Every file is tried against [`ParseStrategy::ORDER`] (TSX, TypeScript,
//! JavaScript). The first grammar whose tree carries no error or missing
//! node wins. When all three fail the unit degrades to a recovery unit: no
//! tree, the last strategy's issues, and a bounded prefix of the text.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use memmap2::MmapOptions;
use serde::Serialize;
use tree_sitter::{Parser, Tree};

pub use crate::unit::ParseStrategy;
use crate::{AnatomistError, ParseCache, ParseIssue, ParsedUnit, Recovery, SyntaxNode};

/// Issues recorded per strategy attempt.
const MAX_ISSUES: usize = 32;

/// Default byte bound on the source prefix kept by recovery units.
pub const DEFAULT_RECOVERY_PREFIX: usize = 16 * 1024;

/// Counters accumulated across `parse` calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParseMetrics {
    pub files_parsed: u64,
    pub cache_hits: u64,
    pub total_errors: u64,
    pub total_parse_micros: u64,
}

impl ParseMetrics {
    pub fn average_parse_micros(&self) -> f64 {
        if self.files_parsed == 0 {
            0.0
        } else {
            self.total_parse_micros as f64 / self.files_parsed as f64
        }
    }
}

/// Owns one tree-sitter `Parser` per strategy plus the parse cache.
///
/// # Example
/// ```no_run
/// use anatomist::ParserHost;
///
/// let mut host = ParserHost::in_memory().unwrap();
/// let unit = host.parse("src/App.tsx", "export const App = () => <div />;");
/// assert!(!unit.is_recovery());
/// ```
pub struct ParserHost {
    parsers: Vec<(ParseStrategy, Parser)>,
    cache: ParseCache,
    recovery_prefix: usize,
    metrics: ParseMetrics,
}

impl ParserHost {
    /// # Errors
    /// Returns `AnatomistError::GrammarFailure` if a grammar cannot be loaded
    /// (ABI mismatch between tree-sitter and a grammar crate).
    pub fn new(cache: ParseCache, recovery_prefix: usize) -> Result<Self, AnatomistError> {
        let mut parsers = Vec::with_capacity(ParseStrategy::ORDER.len());
        for strategy in ParseStrategy::ORDER {
            let mut parser = Parser::new();
            parser.set_language(&strategy.language()).map_err(|e| {
                AnatomistError::GrammarFailure(format!(
                    "Failed to load {} grammar: {}",
                    strategy.name(),
                    e
                ))
            })?;
            parsers.push((strategy, parser));
        }
        Ok(Self {
            parsers,
            cache,
            recovery_prefix,
            metrics: ParseMetrics::default(),
        })
    }

    pub fn in_memory() -> Result<Self, AnatomistError> {
        Self::new(ParseCache::in_memory(), DEFAULT_RECOVERY_PREFIX)
    }

    pub fn metrics(&self) -> &ParseMetrics {
        &self.metrics
    }

    pub fn cache(&self) -> &ParseCache {
        &self.cache
    }

    /// Parses `source` for the file identity `file` (tree-relative key).
    ///
    /// Never fails: unparseable text yields a recovery unit.
    pub fn parse(&mut self, file: &str, source: &str) -> Arc<ParsedUnit> {
        let key = common::content_key(source.as_bytes(), file);
        if let Some(unit) = self.cache.get(&key) {
            self.metrics.cache_hits += 1;
            tracing::trace!(file, "parse cache hit");
            return unit;
        }

        let started = Instant::now();
        let unit = Arc::new(self.parse_uncached(file, key, source));
        self.metrics.files_parsed += 1;
        self.metrics.total_errors += unit.errors.len() as u64;
        self.metrics.total_parse_micros += started.elapsed().as_micros() as u64;

        if let Some(recovery) = &unit.recovery {
            tracing::debug!(file, message = %recovery.message, "no strategy parsed cleanly");
        }
        self.cache.insert(Arc::clone(&unit));
        unit
    }

    /// Reads `root/relative` through a memory map and parses it.
    ///
    /// # Errors
    /// - `IoError`: file not found, permission denied, mmap failure
    /// - `ByteRangeOverflow`: file larger than 4GB (tree-sitter u32 limit)
    pub fn parse_file(
        &mut self,
        root: &Path,
        relative: &str,
    ) -> Result<Arc<ParsedUnit>, AnatomistError> {
        let file = File::open(root.join(relative))?;
        let file_len = file.metadata()?.len();
        if file_len > u32::MAX as u64 {
            return Err(AnatomistError::ByteRangeOverflow);
        }
        if file_len == 0 {
            return Ok(self.parse(relative, ""));
        }

        // SAFETY: The file handle is held for the duration of the mmap lifetime.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        let text = String::from_utf8_lossy(&mmap[..]);
        Ok(self.parse(relative, &text))
    }

    fn parse_uncached(&mut self, file: &str, key: String, source: &str) -> ParsedUnit {
        let mut last_issues = Vec::new();

        for (strategy, parser) in self.parsers.iter_mut() {
            let Some(tree) = parser.parse(source, None) else {
                last_issues = vec![ParseIssue {
                    message: format!("{} parser returned no tree", strategy.name()),
                    line: 1,
                    column: 0,
                }];
                continue;
            };

            if !tree.root_node().has_error() {
                return ParsedUnit {
                    file: file.to_string(),
                    key,
                    strategy: Some(*strategy),
                    source: source.to_string(),
                    nodes: arena_from_tree(&tree),
                    errors: Vec::new(),
                    recovery: None,
                };
            }
            last_issues = collect_issues(&tree, source);
        }

        if last_issues.is_empty() {
            last_issues.push(ParseIssue {
                message: "parser returned no tree".into(),
                line: 1,
                column: 0,
            });
        }

        let prefix = truncate_at_char_boundary(source, self.recovery_prefix);
        // Issues are in document order; the recovery carries the final one.
        let (message, line, column) = last_issues
            .last()
            .map(|i| (i.message.clone(), i.line, i.column))
            .unwrap_or_default();
        ParsedUnit {
            file: file.to_string(),
            key,
            strategy: None,
            recovery: Some(Recovery {
                message,
                line,
                column,
                prefix_len: prefix.len() as u32,
                truncated: prefix.len() < source.len(),
            }),
            source: prefix.to_string(),
            nodes: Vec::new(),
            errors: last_issues,
        }
    }
}

/// Flattens a tree into a pre-order arena with an explicit cursor walk.
fn arena_from_tree(tree: &Tree) -> Vec<SyntaxNode> {
    let mut nodes: Vec<SyntaxNode> = Vec::new();
    let mut ancestors: Vec<u32> = Vec::new();
    let mut cursor = tree.walk();

    loop {
        let node = cursor.node();
        let idx = nodes.len() as u32;
        let parent = ancestors.last().copied();
        nodes.push(SyntaxNode {
            kind: node.kind().to_string(),
            named: node.is_named(),
            field: cursor.field_name().map(str::to_string),
            start_byte: node.start_byte() as u32,
            end_byte: node.end_byte() as u32,
            start_line: node.start_position().row as u32 + 1,
            start_column: node.start_position().column as u32,
            end_line: node.end_position().row as u32 + 1,
            parent,
            children: Vec::new(),
        });
        if let Some(p) = parent {
            nodes[p as usize].children.push(idx);
        }

        if cursor.goto_first_child() {
            ancestors.push(idx);
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return nodes;
            }
            ancestors.pop();
        }
    }
}

/// Error and missing nodes, outermost only, capped at `MAX_ISSUES`.
fn collect_issues(tree: &Tree, source: &str) -> Vec<ParseIssue> {
    let mut issues = Vec::new();
    let mut stack = vec![tree.root_node()];

    while let Some(node) = stack.pop() {
        if issues.len() >= MAX_ISSUES {
            break;
        }
        let pos = node.start_position();
        if node.is_error() {
            let snippet = source
                .get(node.start_byte()..node.end_byte())
                .unwrap_or_default()
                .lines()
                .next()
                .unwrap_or_default();
            let snippet: String = snippet.chars().take(40).collect();
            issues.push(ParseIssue {
                message: format!("unexpected `{}`", snippet.trim()),
                line: pos.row as u32 + 1,
                column: pos.column as u32,
            });
            continue;
        }
        if node.is_missing() {
            issues.push(ParseIssue {
                message: format!("missing `{}`", node.kind()),
                line: pos.row as u32 + 1,
                column: pos.column as u32,
            });
            continue;
        }
        if node.has_error() {
            let mut cursor = node.walk();
            let children: Vec<_> = node.children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }
    issues
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tsx_first() {
        let mut host = ParserHost::in_memory().unwrap();
        let unit = host.parse("App.tsx", "export const App = () => <div>hi</div>;\n");
        assert_eq!(unit.strategy, Some(ParseStrategy::Tsx));
        assert!(unit.errors.is_empty());
        assert_eq!(unit.kind(0), "program");
        assert_eq!(unit.text(0), unit.source.as_str());
    }

    #[test]
    fn test_angle_bracket_cast_falls_back_to_typescript() {
        // `<T>expr` casts are invalid TSX but valid TypeScript.
        let mut host = ParserHost::in_memory().unwrap();
        let unit = host.parse("cast.ts", "const n = <number>value;\n");
        assert_eq!(unit.strategy, Some(ParseStrategy::TypeScript));
    }

    #[test]
    fn test_recovery_unit() {
        let mut host = ParserHost::in_memory().unwrap();
        let unit = host.parse("bad.js", "This is a stray sentence here.\nexport const x = 1;\n");
        assert!(unit.is_recovery());
        assert!(unit.strategy.is_none());
        assert!(unit.nodes.is_empty());
        assert!(!unit.errors.is_empty());
        let recovery = unit.recovery.as_ref().unwrap();
        assert!(!recovery.message.is_empty());
        assert!(!recovery.truncated);
    }

    #[test]
    fn test_recovery_carries_last_issue() {
        let mut host = ParserHost::in_memory().unwrap();
        let unit = host.parse("bad.js", "Stray words one.
const a = 1;
More stray words.
");
        let recovery = unit.recovery.as_ref().unwrap();
        let last = unit.errors.last().unwrap();
        assert_eq!(recovery.message, last.message);
        assert_eq!((recovery.line, recovery.column), (last.line, last.column));
    }

    #[test]
    fn test_recovery_prefix_is_bounded() {
        let mut host = ParserHost::new(ParseCache::in_memory(), 8).unwrap();
        let unit = host.parse("bad.js", "const = = = é;\n");
        let recovery = unit.recovery.as_ref().unwrap();
        assert!(recovery.truncated);
        assert!(unit.source.len() <= 8);
        assert_eq!(recovery.prefix_len as usize, unit.source.len());
    }

    #[test]
    fn test_cache_hit_counts() {
        let mut host = ParserHost::in_memory().unwrap();
        let a = host.parse("a.js", "let a = 1;");
        let b = host.parse("a.js", "let a = 1;");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(host.metrics().files_parsed, 1);
        assert_eq!(host.metrics().cache_hits, 1);

        // Same content, different identity: separate entry.
        host.parse("b.js", "let a = 1;");
        assert_eq!(host.metrics().files_parsed, 2);
    }

    #[test]
    fn test_arena_parent_links() {
        let mut host = ParserHost::in_memory().unwrap();
        let unit = host.parse("a.js", "import x from './x';\n");
        let source = unit.nodes_of_kind("string").next().unwrap();
        let stmt = unit.parent(source).unwrap();
        assert_eq!(unit.kind(stmt), "import_statement");
        assert_eq!(unit.node(source).field.as_deref(), Some("source"));
        assert!(unit.children(stmt).contains(&source));
    }

    #[test]
    fn test_parse_file_empty() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("empty.js"), "").unwrap();
        let mut host = ParserHost::in_memory().unwrap();
        let unit = host.parse_file(tmp.path(), "empty.js").unwrap();
        assert!(!unit.is_recovery());
        assert_eq!(unit.file, "empty.js");
    }

    #[test]
    fn test_truncate_char_boundary() {
        assert_eq!(truncate_at_char_boundary("aé", 2), "a");
        assert_eq!(truncate_at_char_boundary("abc", 10), "abc");
    }
}
