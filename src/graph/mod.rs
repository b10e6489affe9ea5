//! Graph model of an e-free NFA.
//!
//! The automaton tool describes the automaton as text:
//!
//! ```text
//! S [S ...]          source (start) states
//! T [T ...]          target (accepting) states
//! U V Label          one line per transition
//! ```
//!
//! A missing or empty source/target line means the regex accepts the empty
//! language; such a graph still has nodes and edges, it just has no simple
//! paths.

pub mod paths;

pub use paths::{count_simple_paths, PathCount, PathMetrics, ShortestSimplePaths, Truncation};

use std::collections::{BTreeSet, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

/// Errors parsing a graph description.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphParseError {
    #[error("line {line}: invalid node id {token:?}")]
    BadNodeId { line: usize, token: String },
    #[error("line {line}: edge needs a source and a target")]
    ShortEdge { line: usize },
}

/// Directed multigraph with designated source and target nodes.
///
/// Node weights are the tool's state ids. Nodes are inserted in ascending id
/// order, so comparing [`NodeIndex`] values compares state ids.
#[derive(Debug, Clone)]
pub struct GraphModel {
    graph: DiGraph<i64, String>,
    sources: Vec<NodeIndex>,
    targets: Vec<NodeIndex>,
}

impl GraphModel {
    /// Parse the tool's textual description.
    pub fn parse(text: &str) -> Result<Self, GraphParseError> {
        let mut lines = text.lines().map(|l| l.trim_end_matches('\r'));
        let sources = parse_ids(lines.next().unwrap_or(""), 1)?;
        let targets = parse_ids(lines.next().unwrap_or(""), 2)?;

        let mut edges = Vec::new();
        for (offset, line) in lines.enumerate() {
            let lineno = offset + 3;
            let mut tokens = line.split_whitespace();
            let Some(u) = tokens.next() else {
                continue;
            };
            let v = tokens
                .next()
                .ok_or(GraphParseError::ShortEdge { line: lineno })?;
            let label = tokens.collect::<Vec<_>>().join(" ");
            edges.push((parse_id(u, lineno)?, parse_id(v, lineno)?, label));
        }

        let ids: BTreeSet<i64> = sources
            .iter()
            .chain(&targets)
            .copied()
            .chain(edges.iter().flat_map(|(u, v, _)| [*u, *v]))
            .collect();

        let mut graph = DiGraph::with_capacity(ids.len(), edges.len());
        let index: HashMap<i64, NodeIndex> = ids
            .into_iter()
            .map(|id| (id, graph.add_node(id)))
            .collect();
        for (u, v, label) in edges {
            graph.add_edge(index[&u], index[&v], label);
        }

        Ok(Self {
            sources: dedup_nodes(&sources, &index),
            targets: dedup_nodes(&targets, &index),
            graph,
        })
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges, counting parallel edges separately.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn sources(&self) -> &[NodeIndex] {
        &self.sources
    }

    pub fn targets(&self) -> &[NodeIndex] {
        &self.targets
    }

    /// Tool state id of a node.
    pub fn state_id(&self, node: NodeIndex) -> i64 {
        self.graph[node]
    }

    /// The regex accepts nothing.
    pub fn is_empty_language(&self) -> bool {
        self.sources.is_empty() || self.targets.is_empty()
    }

    /// Average out-degree density: distinct directed adjacencies over the
    /// |V|^2 possible ones, 0 for an empty graph.
    pub fn out_degree_density(&self) -> f64 {
        let nodes = self.node_count();
        if nodes == 0 {
            return 0.0;
        }
        let adjacencies: BTreeSet<(NodeIndex, NodeIndex)> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .collect();
        adjacencies.len() as f64 / (nodes as f64 * nodes as f64)
    }

    /// Successor lists with parallel edges collapsed, sorted by node index.
    pub(crate) fn successors(&self) -> Vec<Vec<NodeIndex>> {
        self.graph
            .node_indices()
            .map(|n| {
                let mut next: Vec<NodeIndex> = self.graph.neighbors(n).collect();
                next.sort();
                next.dedup();
                next
            })
            .collect()
    }
}

fn parse_id(token: &str, line: usize) -> Result<i64, GraphParseError> {
    token.parse().map_err(|_| GraphParseError::BadNodeId {
        line,
        token: token.to_string(),
    })
}

fn parse_ids(line: &str, lineno: usize) -> Result<Vec<i64>, GraphParseError> {
    line.split_whitespace()
        .map(|t| parse_id(t, lineno))
        .collect()
}

/// Map ids to nodes, keeping first occurrences in their original order.
fn dedup_nodes(ids: &[i64], index: &HashMap<i64, NodeIndex>) -> Vec<NodeIndex> {
    let mut seen = BTreeSet::new();
    ids.iter()
        .map(|id| index[id])
        .filter(|node| seen.insert(*node))
        .collect()
}
