//! `analyze_project`: discovery → graph → cycles → entry points → critical
//! paths → vulnerabilities → plan → risk, strictly in that order.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;

use anatomist::{
    detect_patterns, extract_dependencies, structural_metrics, ImportKind, ImportResolver,
    ParserHost, Resolution,
};
use common::WardenConfig;
use serde::Serialize;

use crate::classify::{classify, is_entry_point, NodeKind};
use crate::cycles::{detect_cycles, Cycle};
use crate::graph::{EdgeTarget, GraphNode, ImportGraph};
use crate::risk::{
    ExecutionPlan, RiskAssessment, RiskFactors, Severity, VulnerabilityKind, VulnerabilityPoint,
};
use crate::OracleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalReason {
    ParseError,
    SideEffect,
    Entry,
    Provider,
    Context,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CriticalNode {
    pub node: String,
    pub reason: CriticalReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CriticalPath {
    pub entry: String,
    /// BFS order from the entry.
    pub nodes: Vec<CriticalNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphMetrics {
    pub files: usize,
    pub total_bytes: u64,
    pub nodes_by_kind: BTreeMap<NodeKind, usize>,
    pub internal_edges: usize,
    pub external_edges: usize,
    pub dynamic_edges: usize,
    /// Files no parse strategy accepted.
    pub recovery_units: usize,
    pub syntax_nodes: usize,
    pub max_tree_depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisSummary {
    pub risk: RiskAssessment,
    pub vulnerability_counts: BTreeMap<VulnerabilityKind, usize>,
    pub entry_points: usize,
    pub cycles: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectAnalysis {
    pub graph: ImportGraph,
    pub metrics: GraphMetrics,
    pub execution_plan: ExecutionPlan,
    pub summary: AnalysisSummary,
    pub entry_points: Vec<String>,
    pub critical_paths: Vec<CriticalPath>,
    pub cycles: Vec<Cycle>,
    pub vulnerabilities: Vec<VulnerabilityPoint>,
}

impl ProjectAnalysis {
    pub fn vulnerabilities_of(&self, kind: VulnerabilityKind) -> impl Iterator<Item = &VulnerabilityPoint> {
        self.vulnerabilities.iter().filter(move |v| v.kind == kind)
    }
}

/// Analyzes every source file under `root`.
///
/// # Errors
/// Only `OracleError::Config` when the configured ignore globs are invalid.
/// A missing root yields an empty analysis; unreadable files are skipped.
pub fn analyze_project(
    root: &Path,
    host: &mut ParserHost,
    resolver: &dyn ImportResolver,
    config: &WardenConfig,
) -> Result<ProjectAnalysis, OracleError> {
    let filter = config.source_filter()?;
    let files = filter.walk_sources(root);
    tracing::info!(root = %root.display(), files = files.len(), "discovery complete");

    let mut metrics = GraphMetrics {
        files: files.len(),
        ..Default::default()
    };
    let mut nodes = Vec::with_capacity(files.len());
    for file in &files {
        let unit = match host.parse_file(root, &file.relative) {
            Ok(unit) => unit,
            Err(e) => {
                tracing::warn!(file = %file.relative, error = %e, "unreadable file skipped");
                continue;
            }
        };
        let structure = structural_metrics(&unit);
        metrics.total_bytes += file.size;
        metrics.syntax_nodes += structure.node_count;
        metrics.max_tree_depth = metrics.max_tree_depth.max(structure.max_depth);
        if unit.is_recovery() {
            metrics.recovery_units += 1;
        }

        let patterns = detect_patterns(&unit);
        let imports = extract_dependencies(&unit, resolver, root);
        let unresolved_imports = imports
            .iter()
            .filter_map(|r| match &r.resolution {
                Resolution::Missing(spec) => Some(spec.clone()),
                _ => None,
            })
            .collect();
        let has_markup = patterns.has_markup();
        let kind = classify(&file.relative, has_markup);
        tracing::debug!(file = %file.relative, ?kind, imports = imports.len(), "node built");

        nodes.push(GraphNode {
            id: file.relative.clone(),
            kind,
            size: file.size,
            imports,
            exports: patterns.exports,
            has_markup,
            has_side_effects: !patterns.side_effect_calls.is_empty(),
            side_effect_calls: patterns.side_effect_calls,
            hook_calls: patterns.hook_calls,
            parse_errors: unit.errors.clone(),
            unresolved_imports,
            missing_render_binding: has_markup && !patterns.binds_render_library,
        });
    }

    let graph = ImportGraph::from_nodes(nodes);
    for edge in &graph.edges {
        match edge.target {
            EdgeTarget::Internal => metrics.internal_edges += 1,
            EdgeTarget::External => metrics.external_edges += 1,
        }
        if edge.import_kind == ImportKind::Dynamic {
            metrics.dynamic_edges += 1;
        }
    }
    for node in &graph.nodes {
        *metrics.nodes_by_kind.entry(node.kind).or_default() += 1;
    }
    tracing::info!(
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        "graph constructed"
    );

    let cycles = detect_cycles(&graph);
    if !cycles.is_empty() {
        tracing::info!(cycles = cycles.len(), "import cycles found");
    }

    let entries: Vec<usize> = (0..graph.nodes.len())
        .filter(|&i| is_entry_point(&graph.nodes[i].id, graph.nodes[i].kind))
        .collect();
    let critical_paths: Vec<CriticalPath> = entries
        .iter()
        .map(|&e| critical_path(&graph, e))
        .collect();

    let on_critical_path: HashSet<&str> = critical_paths
        .iter()
        .flat_map(|p| p.nodes.iter().map(|n| n.node.as_str()))
        .collect();

    let vulnerabilities = aggregate_vulnerabilities(&graph, &cycles, &on_critical_path);

    let critical_syntax: Vec<String> = graph
        .nodes
        .iter()
        .filter(|n| !n.parse_errors.is_empty() && on_critical_path.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect();
    let side_effect_files: Vec<String> = vulnerabilities
        .iter()
        .filter(|v| v.kind == VulnerabilityKind::ModuleSideEffect)
        .map(|v| v.file.clone())
        .collect();
    let unresolved_files: Vec<String> = graph
        .nodes
        .iter()
        .filter(|n| !n.unresolved_imports.is_empty())
        .map(|n| n.id.clone())
        .collect();

    let mut vulnerability_counts = BTreeMap::new();
    for v in &vulnerabilities {
        *vulnerability_counts.entry(v.kind).or_insert(0) += 1;
    }
    let risk = RiskAssessment::from_factors(RiskFactors {
        critical_parse_errors: critical_syntax.len() as u32,
        side_effects: side_effect_files.len() as u32,
        missing_dependencies: *vulnerability_counts
            .get(&VulnerabilityKind::MissingDependency)
            .unwrap_or(&0) as u32,
        cycles: cycles.len() as u32,
    });
    tracing::info!(score = risk.score, level = ?risk.level, "risk scored");

    let entry_points: Vec<String> = entries.iter().map(|&e| graph.nodes[e].id.clone()).collect();
    Ok(ProjectAnalysis {
        summary: AnalysisSummary {
            risk,
            vulnerability_counts,
            entry_points: entry_points.len(),
            cycles: cycles.len(),
        },
        execution_plan: ExecutionPlan::new(critical_syntax, side_effect_files, unresolved_files),
        graph,
        metrics,
        entry_points,
        critical_paths,
        cycles,
        vulnerabilities,
    })
}

/// Parse error > side effect > structural kind.
fn critical_reason(graph: &ImportGraph, i: usize) -> Option<CriticalReason> {
    let node = &graph.nodes[i];
    if !node.parse_errors.is_empty() {
        Some(CriticalReason::ParseError)
    } else if node.has_side_effects {
        Some(CriticalReason::SideEffect)
    } else if is_entry_point(&node.id, node.kind) {
        Some(CriticalReason::Entry)
    } else {
        match node.kind {
            NodeKind::Provider => Some(CriticalReason::Provider),
            NodeKind::Context => Some(CriticalReason::Context),
            _ => None,
        }
    }
}

fn critical_path(graph: &ImportGraph, entry: usize) -> CriticalPath {
    let mut visited = vec![false; graph.nodes.len()];
    let mut queue = VecDeque::from([entry]);
    visited[entry] = true;
    let mut nodes = Vec::new();

    while let Some(i) = queue.pop_front() {
        if let Some(reason) = critical_reason(graph, i) {
            nodes.push(CriticalNode {
                node: graph.nodes[i].id.clone(),
                reason,
            });
        }
        for next in graph.successors(i, false) {
            if !visited[next] {
                visited[next] = true;
                queue.push_back(next);
            }
        }
    }

    CriticalPath {
        entry: graph.nodes[entry].id.clone(),
        nodes,
    }
}

fn aggregate_vulnerabilities(
    graph: &ImportGraph,
    cycles: &[Cycle],
    on_critical_path: &HashSet<&str>,
) -> Vec<VulnerabilityPoint> {
    let mut out = Vec::new();
    for node in &graph.nodes {
        if let Some(first) = node.parse_errors.first() {
            out.push(VulnerabilityPoint {
                file: node.id.clone(),
                kind: VulnerabilityKind::ParseError,
                severity: if on_critical_path.contains(node.id.as_str()) {
                    Severity::Critical
                } else {
                    Severity::High
                },
                detail: format!("{}:{}: {}", first.line, first.column, first.message),
            });
        }
        if node.has_side_effects && node.kind != NodeKind::Utility {
            out.push(VulnerabilityPoint {
                file: node.id.clone(),
                kind: VulnerabilityKind::ModuleSideEffect,
                severity: Severity::Medium,
                detail: node.side_effect_calls.join(", "),
            });
        }
        for spec in &node.unresolved_imports {
            out.push(VulnerabilityPoint {
                file: node.id.clone(),
                kind: VulnerabilityKind::MissingDependency,
                severity: Severity::High,
                detail: format!("unresolved import '{spec}'"),
            });
        }
        if node.missing_render_binding {
            out.push(VulnerabilityPoint {
                file: node.id.clone(),
                kind: VulnerabilityKind::MissingImport,
                severity: Severity::Medium,
                detail: "markup used without React in scope".to_string(),
            });
        }
    }
    for cycle in cycles {
        let mut ring = cycle.nodes.clone();
        if let Some(first) = cycle.nodes.first() {
            ring.push(first.clone());
        }
        out.push(VulnerabilityPoint {
            file: cycle.id.clone(),
            kind: VulnerabilityKind::CircularDependency,
            severity: Severity::High,
            detail: ring.join(" -> "),
        });
    }
    out
}
