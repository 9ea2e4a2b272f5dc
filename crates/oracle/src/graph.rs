//! # Import Graph
//!
//! `nodes` is the arena; a petgraph `DiGraph` mirrors it index for index and
//! carries only internal edges (weight = position in `edges`). External
//! edges point at `npm:<package>` markers and live in `edges` alone.

use std::collections::HashMap;

use anatomist::{ImportKind, ImportRecord, ParseIssue};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;

use crate::classify::NodeKind;

/// Prefix of external package markers in `GraphEdge::to`.
pub const EXTERNAL_PREFIX: &str = "npm:";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    /// Tree-relative path.
    pub id: String,
    pub kind: NodeKind,
    pub size: u64,
    pub imports: Vec<ImportRecord>,
    pub exports: Vec<String>,
    pub has_markup: bool,
    pub has_side_effects: bool,
    pub side_effect_calls: Vec<String>,
    pub hook_calls: Vec<String>,
    pub parse_errors: Vec<ParseIssue>,
    /// Relative specifiers that matched no file.
    pub unresolved_imports: Vec<String>,
    /// Markup present but `React` not bound.
    pub missing_render_binding: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeTarget {
    Internal,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub import_kind: ImportKind,
    pub target: EdgeTarget,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    #[serde(skip)]
    digraph: DiGraph<usize, usize>,
}

impl ImportGraph {
    /// Builds the graph from nodes sorted by id. Edges are derived from
    /// each node's resolved imports, in import order.
    pub fn from_nodes(mut nodes: Vec<GraphNode>) -> Self {
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut digraph = DiGraph::with_capacity(nodes.len(), 0);
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            digraph.add_node(i);
            index.insert(node.id.clone(), i);
        }

        let mut edges = Vec::new();
        for (i, node) in nodes.iter().enumerate() {
            for record in &node.imports {
                let (to, target) = match &record.resolution {
                    anatomist::Resolution::Internal(key) => match index.get(key) {
                        Some(&j) => {
                            digraph.add_edge(NodeIndex::new(i), NodeIndex::new(j), edges.len());
                            (key.clone(), EdgeTarget::Internal)
                        }
                        // Resolved to a file discovery skipped (ignored or
                        // non-source); no node to point at.
                        None => continue,
                    },
                    anatomist::Resolution::External(pkg) => {
                        (format!("{EXTERNAL_PREFIX}{pkg}"), EdgeTarget::External)
                    }
                    anatomist::Resolution::Missing(_) => continue,
                };
                edges.push(GraphEdge {
                    from: node.id.clone(),
                    to,
                    import_kind: record.kind,
                    target,
                });
            }
        }

        Self {
            nodes,
            edges,
            index,
            digraph,
        }
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn digraph(&self) -> &DiGraph<usize, usize> {
        &self.digraph
    }

    /// Distinct internal successors of node `i` in first-import order.
    pub fn successors(&self, i: usize, static_only: bool) -> Vec<usize> {
        let mut out: Vec<(usize, usize)> = self
            .digraph
            .edges_directed(NodeIndex::new(i), Direction::Outgoing)
            .filter(|e| !static_only || self.edges[*e.weight()].import_kind == ImportKind::Static)
            .map(|e| (*e.weight(), e.target().index()))
            .collect();
        out.sort_unstable();
        let mut seen = Vec::with_capacity(out.len());
        for (_, target) in out {
            if !seen.contains(&target) {
                seen.push(target);
            }
        }
        seen
    }

    pub fn internal_edge_count(&self) -> usize {
        self.digraph.edge_count()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anatomist::{ImportShape, Resolution};

    pub(crate) fn node(id: &str, imports: &[(&str, ImportKind)]) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            kind: NodeKind::Module,
            size: 0,
            imports: imports
                .iter()
                .map(|(target, kind)| ImportRecord {
                    source: target.to_string(),
                    resolution: if target.ends_with(".js") {
                        Resolution::Internal(target.to_string())
                    } else if target.starts_with("./") {
                        Resolution::Missing(target.to_string())
                    } else {
                        Resolution::External(target.to_string())
                    },
                    specifiers: vec![],
                    shape: ImportShape::Default,
                    kind: *kind,
                    line: 1,
                })
                .collect(),
            exports: vec![],
            has_markup: false,
            has_side_effects: false,
            side_effect_calls: vec![],
            hook_calls: vec![],
            parse_errors: vec![],
            unresolved_imports: vec![],
            missing_render_binding: false,
        }
    }

    #[test]
    fn test_edges_reference_nodes_or_markers() {
        let graph = ImportGraph::from_nodes(vec![
            node("b.js", &[]),
            node(
                "a.js",
                &[
                    ("b.js", ImportKind::Static),
                    ("react", ImportKind::Static),
                    ("./gone", ImportKind::Static),
                    ("b.js", ImportKind::Dynamic),
                ],
            ),
        ]);
        assert_eq!(graph.nodes[0].id, "a.js");
        assert_eq!(graph.edges.len(), 3);
        for edge in &graph.edges {
            assert!(graph.node(&edge.from).is_some());
            assert!(graph.node(&edge.to).is_some() || edge.to.starts_with(EXTERNAL_PREFIX));
        }
        assert_eq!(graph.internal_edge_count(), 2);
        assert_eq!(graph.successors(0, false), vec![1]);
        assert_eq!(graph.successors(0, true), vec![1]);
    }
}
