//! Bounded simple path enumeration.
//!
//! Simple paths are enumerated shortest first (Yen's algorithm over unit edge
//! weights), so a search cut short by the count or time ceiling has counted
//! the cheap paths rather than an arbitrary sample.
//!
//! Paths are node sequences: parallel edges between the same two states do
//! not create additional paths.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::time::Instant;

use petgraph::graph::NodeIndex;
use serde::Serialize;
use tracing::{debug, warn};

use super::GraphModel;
use crate::automaton::GraphText;
use crate::config::PathLimits;

/// Sentinel for a metric that was not computed.
pub const NOT_COMPUTED: i64 = -1;

/// Why a path search stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Truncation {
    CountLimit,
    Deadline,
}

/// Result of a bounded path search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathCount {
    pub count: usize,
    pub truncated: Option<Truncation>,
}

/// Simple paths from one source to one target, shortest first.
///
/// Ties between equally long paths are broken by comparing node sequences,
/// which makes the order deterministic.
pub struct ShortestSimplePaths<'a> {
    successors: &'a [Vec<NodeIndex>],
    source: NodeIndex,
    target: NodeIndex,
    found: Vec<Vec<NodeIndex>>,
    candidates: BTreeSet<(usize, Vec<NodeIndex>)>,
    started: bool,
}

impl<'a> ShortestSimplePaths<'a> {
    /// `successors[n]` lists the successors of node `n` in ascending order.
    pub fn new(successors: &'a [Vec<NodeIndex>], source: NodeIndex, target: NodeIndex) -> Self {
        Self {
            successors,
            source,
            target,
            found: Vec::new(),
            candidates: BTreeSet::new(),
            started: false,
        }
    }

    /// Queue every deviation from the most recently found path.
    fn extend_candidates(&mut self) {
        let Some(last) = self.found.last() else {
            return;
        };

        for i in 0..last.len().saturating_sub(1) {
            let spur = last[i];
            let root = &last[..=i];

            let blocked_edges: HashSet<(NodeIndex, NodeIndex)> = self
                .found
                .iter()
                .filter(|p| p.len() > i + 1 && p[..=i] == *root)
                .map(|p| (p[i], p[i + 1]))
                .collect();
            let blocked_nodes: HashSet<NodeIndex> = root[..i].iter().copied().collect();

            if let Some(spur_path) = shortest_path(
                self.successors,
                spur,
                self.target,
                &blocked_nodes,
                &blocked_edges,
            ) {
                let mut path = root[..i].to_vec();
                path.extend(spur_path);
                self.candidates.insert((path.len(), path));
            }
        }
    }
}

impl Iterator for ShortestSimplePaths<'_> {
    type Item = Vec<NodeIndex>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            let path = shortest_path(
                self.successors,
                self.source,
                self.target,
                &HashSet::new(),
                &HashSet::new(),
            )?;
            self.found.push(path.clone());
            return Some(path);
        }

        self.extend_candidates();
        let (_, path) = self.candidates.pop_first()?;
        self.found.push(path.clone());
        Some(path)
    }
}

/// Breadth-first shortest path avoiding the blocked nodes and edges.
fn shortest_path(
    successors: &[Vec<NodeIndex>],
    from: NodeIndex,
    to: NodeIndex,
    blocked_nodes: &HashSet<NodeIndex>,
    blocked_edges: &HashSet<(NodeIndex, NodeIndex)>,
) -> Option<Vec<NodeIndex>> {
    if from == to {
        return Some(vec![from]);
    }

    let mut parent: Vec<Option<NodeIndex>> = vec![None; successors.len()];
    let mut queue = VecDeque::from([from]);
    let mut visited = vec![false; successors.len()];
    visited[from.index()] = true;

    while let Some(node) = queue.pop_front() {
        for &next in &successors[node.index()] {
            if visited[next.index()]
                || blocked_nodes.contains(&next)
                || blocked_edges.contains(&(node, next))
            {
                continue;
            }
            visited[next.index()] = true;
            parent[next.index()] = Some(node);
            if next == to {
                let mut path = vec![to];
                let mut cur = to;
                while let Some(p) = parent[cur.index()] {
                    path.push(p);
                    cur = p;
                }
                path.reverse();
                return Some(path);
            }
            queue.push_back(next);
        }
    }
    None
}

/// Count simple paths from every source to every target.
///
/// The count and time ceilings apply to the whole graph: once either is hit
/// no further source/target pairs are searched. The deadline is only checked
/// between path discoveries.
pub fn count_simple_paths(graph: &GraphModel, limits: &PathLimits) -> PathCount {
    let mut result = PathCount {
        count: 0,
        truncated: None,
    };
    if graph.is_empty_language() {
        return result;
    }

    debug!(
        "Computing simple paths for automaton with {} sources, {} targets, {} nodes, {} edges",
        graph.sources().len(),
        graph.targets().len(),
        graph.node_count(),
        graph.edge_count()
    );

    let successors = graph.successors();
    let deadline = limits.time_limit.map(|t| Instant::now() + t);
    let mut discovered = 0usize;

    for &source in graph.sources() {
        for &target in graph.targets() {
            for _path in ShortestSimplePaths::new(&successors, source, target) {
                discovered += 1;
                if limits.count_limit.is_some_and(|limit| discovered > limit) {
                    debug!("simple path limit reached");
                    result.truncated = Some(Truncation::CountLimit);
                    return result;
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    debug!("simple path timeout reached");
                    result.truncated = Some(Truncation::Deadline);
                    return result;
                }
                result.count += 1;
            }
        }
    }
    result
}

/// Path-derived metrics of one regex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathMetrics {
    /// Simple paths found, or [`NOT_COMPUTED`].
    pub simple_paths: i64,
    /// |E| / |V|^2, or -1 when no graph was available.
    pub density: f64,
}

impl PathMetrics {
    pub fn not_computed() -> Self {
        Self {
            simple_paths: NOT_COMPUTED,
            density: NOT_COMPUTED as f64,
        }
    }

    /// Metrics for the e-free NFA carried by an automaton profile.
    pub fn from_graph_text(text: GraphText<'_>, limits: &PathLimits) -> Self {
        let GraphText::Present(text) = text else {
            return Self::not_computed();
        };
        let graph = match GraphModel::parse(text) {
            Ok(graph) => graph,
            Err(e) => {
                warn!("Exception obtaining graph metrics: {e}");
                return Self::not_computed();
            }
        };

        let density = graph.out_degree_density();
        let paths = count_simple_paths(&graph, limits);
        if paths.count > 0 {
            debug!("{} simple paths", paths.count);
        }
        debug!("avg outdegree density {density}");
        Self {
            simple_paths: i64::try_from(paths.count).unwrap_or(i64::MAX),
            density,
        }
    }
}
