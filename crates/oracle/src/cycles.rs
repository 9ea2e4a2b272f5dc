//! Cycle detection over the static-import subgraph.
//!
//! Iterative DFS with an explicit frame stack, a path stack and an on-stack
//! set. A back edge to a node on the path records the slice of the path from
//! that node's position. Cycles are deduplicated by rotation.

use std::collections::HashSet;

use serde::Serialize;

use crate::graph::ImportGraph;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cycle {
    /// Synthetic vulnerability key, `cycle:<n>` (1-based).
    pub id: String,
    /// Node ids in traversal order, starting at the smallest id.
    pub nodes: Vec<String>,
}

pub fn detect_cycles(graph: &ImportGraph) -> Vec<Cycle> {
    let n = graph.nodes.len();
    let adjacency: Vec<Vec<usize>> = (0..n).map(|i| graph.successors(i, true)).collect();

    let mut done = vec![false; n];
    let mut on_stack = vec![false; n];
    let mut seen: HashSet<Vec<usize>> = HashSet::new();
    let mut found: Vec<Vec<usize>> = Vec::new();

    for start in 0..n {
        if done[start] {
            continue;
        }
        // (node, next successor position)
        let mut frames: Vec<(usize, usize)> = vec![(start, 0)];
        let mut path: Vec<usize> = vec![start];
        on_stack[start] = true;

        while let Some(frame) = frames.last_mut() {
            let (node, pos) = *frame;
            if let Some(&next) = adjacency[node].get(pos) {
                frame.1 += 1;
                if on_stack[next] {
                    if let Some(at) = path.iter().position(|&p| p == next) {
                        let cycle = canonical_rotation(&path[at..]);
                        if seen.insert(cycle.clone()) {
                            found.push(cycle);
                        }
                    }
                } else if !done[next] {
                    on_stack[next] = true;
                    path.push(next);
                    frames.push((next, 0));
                }
            } else {
                frames.pop();
                path.pop();
                on_stack[node] = false;
                done[node] = true;
            }
        }
    }

    found
        .into_iter()
        .enumerate()
        .map(|(i, cycle)| Cycle {
            id: format!("cycle:{}", i + 1),
            nodes: cycle.iter().map(|&c| graph.nodes[c].id.clone()).collect(),
        })
        .collect()
}

/// Rotates so the smallest index comes first.
fn canonical_rotation(cycle: &[usize]) -> Vec<usize> {
    let min_at = cycle
        .iter()
        .enumerate()
        .min_by_key(|&(_, v)| *v)
        .map(|(i, _)| i)
        .unwrap_or(0);
    cycle[min_at..].iter().chain(&cycle[..min_at]).copied().collect()
}
