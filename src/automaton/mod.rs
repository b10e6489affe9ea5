//! Automaton analysis of canonical patterns.
//!
//! The engine does not build automata itself. An [`AnalysisBackend`] turns a
//! batch of canonical patterns into one [`AutomatonProfile`] per pattern; the
//! default backend, [`AutomataCli`], drives an external tool over an NDJSON
//! file protocol (see [`protocol`]).

mod cli;
pub mod protocol;

pub use cli::AutomataCli;

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::subprocess::ToolError;
use crate::translate::CanonicalPattern;

/// Key of the e-free NFA description inside the automaton measures.
pub const GRAPH_KEY: &str = "efreeNFAGraph";
/// Graph value the tool emits when it gave up building the automaton.
pub const GRAPH_TIMEOUT: &str = "TIMEOUT";

/// Feature tag to occurrence count.
pub type FeatureVector = BTreeMap<String, i64>;

/// What the automaton tool reported for one pattern.
///
/// An invalid profile is a normal value: the pattern did not translate, the
/// tool rejected it, or its response line was unreadable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutomatonProfile {
    /// The pattern is a valid regex in the canonical dialect.
    pub valid: bool,
    pub features: FeatureVector,
    /// Structural measures as reported by the tool, including the graph text.
    pub measures: Map<String, Value>,
}

/// The e-free NFA description carried by a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphText<'a> {
    Absent,
    /// The tool ran out of time building the automaton.
    TimedOut,
    Present(&'a str),
}

impl AutomatonProfile {
    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn graph(&self) -> GraphText<'_> {
        match self.measures.get(GRAPH_KEY).and_then(Value::as_str) {
            None => GraphText::Absent,
            Some(GRAPH_TIMEOUT) => GraphText::TimedOut,
            Some(text) => GraphText::Present(text),
        }
    }
}

/// Produces automaton profiles for batches of canonical patterns.
///
/// Implementations must return exactly one profile per input pattern, in
/// input order. An `Err` means the whole batch could not be analyzed.
pub trait AnalysisBackend: Send + Sync {
    fn analyze(&self, patterns: &[CanonicalPattern]) -> Result<Vec<AutomatonProfile>, ToolError>;
}
