//! Regex metrics library - measures structural and worst-case properties of
//! a regex corpus.
//!
//! Each regex is translated into the canonical (C#) dialect, profiled by an
//! external automaton tool, and its e-free NFA is analyzed for simple paths
//! and out-degree density. A static analysis detector optionally predicts its
//! worst-case behavior in a backtracking engine. Batches run in parallel and
//! results are streamed as NDJSON.
//!
//! # Modules
//!
//! - [`corpus`] - Loading regex records
//! - [`translate`] - Pattern translation into the canonical dialect
//! - [`automaton`] - Automaton analysis backends and the tool's wire format
//! - [`graph`] - E-free NFA graphs and bounded simple path counting
//! - [`worst_case`] - Predicted worst-case behavior
//! - [`scheduler`] - Batches and the parallel execution engine
//! - [`measure`] - Top-level run
//!
//! # Example
//!
//! ```no_run
//! use regex_metrics::config::{Analyses, MeasureConfig};
//! use regex_metrics::measure::{measure, tool_command, Config};
//! use std::path::{Path, PathBuf};
//!
//! let config = Config {
//!     regex_file: PathBuf::from("corpus.json"),
//!     out_file: PathBuf::from("metrics.json"),
//!     measure: MeasureConfig {
//!         analyses: Analyses {
//!             automaton: true,
//!             simple_paths: true,
//!             worst_case: false,
//!         },
//!         automata_cli: Some(tool_command(Path::new("AutomataCLI.exe"), None)),
//!         ..MeasureConfig::default()
//!     },
//!     ..Config::default()
//! };
//! let summary = measure(config, None).expect("measurement failed");
//! println!("{summary}");
//! ```

pub mod automaton;
pub mod config;
pub mod corpus;
pub mod graph;
pub mod measure;
pub mod metrics;
pub mod output;
pub mod scheduler;
pub mod subprocess;
pub mod translate;
pub mod worst_case;

pub use config::{Analyses, MeasureConfig, PathLimits};
pub use measure::{measure, Config};
pub use metrics::RegexMetrics;
pub use scheduler::RunSummary;
