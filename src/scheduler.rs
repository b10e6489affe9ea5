//! Batch scheduling and parallel execution.
//!
//! The corpus is split into fixed-size batches. Each batch is measured on a
//! worker pool thread by the [`Engine`]; results come back over a channel in
//! completion order and are written to the sink by the calling thread, so the
//! sink never sees interleaved writes.
//!
//! A batch is the unit of failure: if its automaton tool invocation fails or
//! the worker panics, every record in it is counted as failed and the run
//! moves on.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, warn};
use workerpool::thunk::{Thunk, ThunkWorker};
use workerpool::Pool;

use crate::automaton::{AnalysisBackend, AutomatonProfile};
use crate::config::MeasureConfig;
use crate::corpus::RegexRecord;
use crate::graph::PathMetrics;
use crate::metrics::{aggregate, RegexMetrics};
use crate::output::MetricsSink;
use crate::subprocess::ToolError;
use crate::translate::{CanonicalPattern, Dialect, Translator};
use crate::worst_case::{ComplexityVerdict, WorstCaseOracle};

/// An ordered slice of the corpus measured as one unit.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: usize,
    pub records: Vec<RegexRecord>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Split `records` into batches of at most `batch_size`, keeping order.
pub fn partition(records: Vec<RegexRecord>, batch_size: usize) -> Vec<Batch> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(records.len().div_ceil(batch_size));
    let mut records = records.into_iter().peekable();
    while records.peek().is_some() {
        let chunk: Vec<RegexRecord> = records.by_ref().take(batch_size).collect();
        batches.push(Batch {
            id: batches.len(),
            records: chunk,
        });
    }
    batches
}

/// Lifecycle of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchState::Pending => "pending",
            BatchState::Running => "running",
            BatchState::Succeeded => "succeeded",
            BatchState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a whole batch produced no metrics.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("automaton analysis failed: {0}")]
    Analysis(#[from] ToolError),
    #[error("automaton analysis requested but no backend configured")]
    NoBackend,
    #[error("expected {expected} automaton profiles, got {actual}")]
    ProfileCount { expected: usize, actual: usize },
    #[error("worker panicked: {0}")]
    Panic(String),
}

/// Result of running one batch on a worker.
#[derive(Debug)]
pub enum BatchOutcome {
    Succeeded {
        id: usize,
        metrics: Vec<RegexMetrics>,
    },
    Failed {
        id: usize,
        records: usize,
        error: BatchError,
    },
}

impl BatchOutcome {
    pub fn id(&self) -> usize {
        match self {
            BatchOutcome::Succeeded { id, .. } | BatchOutcome::Failed { id, .. } => *id,
        }
    }

    pub fn state(&self) -> BatchState {
        match self {
            BatchOutcome::Succeeded { .. } => BatchState::Succeeded,
            BatchOutcome::Failed { .. } => BatchState::Failed,
        }
    }
}

/// Measures batches. Shared by every worker.
pub struct Engine {
    config: Arc<MeasureConfig>,
    translator: Translator,
    backend: Option<Arc<dyn AnalysisBackend>>,
    oracle: Option<Arc<dyn WorstCaseOracle>>,
}

impl Engine {
    pub fn new(config: Arc<MeasureConfig>) -> Self {
        let translator =
            Translator::new(Dialect::CSharp).with_alt_unicode_flag(config.alt_unicode_flag);
        Self {
            config,
            translator,
            backend: None,
            oracle: None,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn AnalysisBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn WorstCaseOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn config(&self) -> &MeasureConfig {
        &self.config
    }

    /// Measure every record of a batch, or fail the batch as a whole.
    pub fn measure_batch(&self, batch: &Batch) -> Result<Vec<RegexMetrics>, BatchError> {
        let analyses = self.config.analyses;

        let canonical: Vec<CanonicalPattern> = batch
            .records
            .iter()
            .map(|r| {
                let c = self.translator.translate(&r.pattern, &r.flags, r.dialect());
                debug!("batch {}: /{}/ -> /{}/", batch.id, r.pattern, c.pattern);
                c
            })
            .collect();

        let profiles: Option<Vec<AutomatonProfile>> = if analyses.automaton {
            let backend = self.backend.as_ref().ok_or(BatchError::NoBackend)?;
            let profiles = backend.analyze(&canonical)?;
            if profiles.len() != canonical.len() {
                return Err(BatchError::ProfileCount {
                    expected: canonical.len(),
                    actual: profiles.len(),
                });
            }
            Some(profiles)
        } else {
            None
        };

        let oracle = if analyses.worst_case {
            self.oracle.as_deref()
        } else {
            None
        };

        let metrics = batch
            .records
            .iter()
            .zip(&canonical)
            .enumerate()
            .map(|(i, (record, canonical))| {
                let profile = profiles.as_ref().map(|p| &p[i]);
                let paths = match profile {
                    Some(p) if analyses.simple_paths => {
                        PathMetrics::from_graph_text(p.graph(), &self.config.path_limits)
                    }
                    _ => PathMetrics::not_computed(),
                };
                let verdict = oracle
                    .map(|o| o.predict(&canonical.pattern))
                    .unwrap_or(ComplexityVerdict::Unknown);
                aggregate(record, canonical, profile, paths, verdict)
            })
            .collect();
        Ok(metrics)
    }

    /// Measure a batch, turning errors and panics into a failed outcome.
    pub fn run_batch(&self, batch: Batch) -> BatchOutcome {
        debug!("batch {} {} ({} regexes)", batch.id, BatchState::Running, batch.len());
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.measure_batch(&batch)))
            .unwrap_or_else(|payload| Err(BatchError::Panic(panic_message(payload))));

        match result {
            Ok(metrics) => BatchOutcome::Succeeded {
                id: batch.id,
                metrics,
            },
            Err(error) => BatchOutcome::Failed {
                id: batch.id,
                records: batch.len(),
                error,
            },
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Totals for a run. Every input record ends up in exactly one of
/// `succeeded`, `failed` or `cancelled`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: usize,
    pub records: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failed_batches: usize,
    /// Records never dispatched because the run was stopped.
    pub cancelled: usize,
}

impl RunSummary {
    pub fn accounted(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    pub fn success_percent(&self) -> f64 {
        if self.records == 0 {
            0.0
        } else {
            100.0 * self.succeeded as f64 / self.records as f64
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Successfully computed metrics for {}/{} ({:.2}%) of the regexes",
            self.succeeded,
            self.records,
            self.success_percent()
        )
    }
}

/// Runs batches on a fixed-size worker pool.
pub struct Scheduler {
    engine: Arc<Engine>,
    stop: Option<Arc<AtomicBool>>,
}

impl Scheduler {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
            stop: None,
        }
    }

    /// Stop dispatching new batches once `stop` is set.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stopped(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|s| s.load(Ordering::Relaxed))
    }

    /// Measure `records`, streaming metrics to `sink` as batches complete.
    ///
    /// Only a sink write failure aborts the run.
    pub fn run(&self, records: Vec<RegexRecord>, sink: &mut dyn MetricsSink) -> Result<RunSummary> {
        let config = self.engine.config();
        let batches = partition(records, config.batch_size);
        let mut summary = RunSummary {
            batches: batches.len(),
            records: batches.iter().map(Batch::len).sum(),
            ..RunSummary::default()
        };
        info!(
            "Measuring {} regexes in {} batches on {} workers",
            summary.records, summary.batches, config.workers
        );

        let mut states = vec![BatchState::Pending; batches.len()];
        let pool = Pool::<ThunkWorker<BatchOutcome>>::new(config.workers);
        let (tx, rx) = mpsc::channel();
        let mut pending = batches.into_iter();
        let mut in_flight = 0usize;

        loop {
            while in_flight < config.queue_depth && !self.stopped() {
                let Some(batch) = pending.next() else {
                    break;
                };
                states[batch.id] = BatchState::Running;
                let engine = Arc::clone(&self.engine);
                pool.execute_to(tx.clone(), Thunk::of(move || engine.run_batch(batch)));
                in_flight += 1;
            }
            if in_flight == 0 {
                break;
            }

            let outcome = rx
                .recv()
                .context("Worker pool hung up before all batches completed")?;
            in_flight -= 1;
            states[outcome.id()] = outcome.state();
            debug!("batch {} {}", outcome.id(), outcome.state());
            self.record_outcome(outcome, sink, &mut summary)?;
        }

        for batch in pending {
            summary.cancelled += batch.len();
        }
        if summary.cancelled > 0 {
            warn!("Stopped early; {} regexes were not measured", summary.cancelled);
        }
        pool.join();

        debug_assert!(states.iter().all(|s| *s != BatchState::Running));
        debug_assert_eq!(summary.accounted(), summary.records);
        Ok(summary)
    }

    fn record_outcome(
        &self,
        outcome: BatchOutcome,
        sink: &mut dyn MetricsSink,
        summary: &mut RunSummary,
    ) -> Result<()> {
        match outcome {
            BatchOutcome::Succeeded { id, metrics } => {
                info!("Emitting batch {} ({} results)", id, metrics.len());
                for m in &metrics {
                    sink.write_metrics(m)?;
                }
                sink.flush()?;
                summary.succeeded += metrics.len();
            }
            BatchOutcome::Failed { id, records, error } => {
                warn!("batch {id} failed, counting {records} regexes as failures: {error}");
                summary.failed += records;
                summary.failed_batches += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Analyses;
    use crate::output::InMemorySink;
    use serde_json::{json, Map};
    use std::collections::BTreeSet;

    /// Backend that answers with a fixed graph, failing or panicking on
    /// patterns that ask it to.
    struct FakeBackend;

    impl AnalysisBackend for FakeBackend {
        fn analyze(
            &self,
            patterns: &[CanonicalPattern],
        ) -> Result<Vec<AutomatonProfile>, ToolError> {
            if patterns.iter().any(|p| p.pattern == "panic") {
                panic!("backend blew up");
            }
            if patterns.iter().any(|p| p.pattern == "timeout") {
                return Err(ToolError::Timeout(std::time::Duration::from_secs(1)));
            }
            Ok(patterns
                .iter()
                .map(|p| {
                    if p.pattern == "(" {
                        return AutomatonProfile::invalid();
                    }
                    let mut measures = Map::new();
                    measures.insert("efreeNFAGraph".into(), json!("0\n2\n0 1 a\n1 2 b"));
                    AutomatonProfile {
                        valid: true,
                        features: [("BKR".to_string(), 1)].into_iter().collect(),
                        measures,
                    }
                })
                .collect())
        }
    }

    struct ShortBackend;

    impl AnalysisBackend for ShortBackend {
        fn analyze(
            &self,
            _patterns: &[CanonicalPattern],
        ) -> Result<Vec<AutomatonProfile>, ToolError> {
            Ok(vec![AutomatonProfile::invalid()])
        }
    }

    struct FixedOracle(ComplexityVerdict);

    impl WorstCaseOracle for FixedOracle {
        fn predict(&self, _pattern: &str) -> ComplexityVerdict {
            self.0
        }
    }

    fn config(batch_size: usize, workers: usize) -> Arc<MeasureConfig> {
        Arc::new(MeasureConfig {
            analyses: Analyses {
                automaton: true,
                simple_paths: true,
                worst_case: false,
            },
            batch_size,
            workers,
            queue_depth: workers * 2,
            ..MeasureConfig::default()
        })
    }

    fn records(patterns: &[&str]) -> Vec<RegexRecord> {
        patterns.iter().map(|p| RegexRecord::new(*p)).collect()
    }

    fn run(engine: Engine, patterns: &[&str]) -> (RunSummary, Vec<RegexMetrics>) {
        let mut sink = InMemorySink::new();
        let summary = Scheduler::new(engine)
            .run(records(patterns), &mut sink)
            .unwrap();
        (summary, sink.into_records())
    }

    #[test]
    fn test_partition_keeps_order() {
        let batches = partition(records(&["a", "b", "c", "d", "e"]), 2);
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(batches[2].id, 2);
        assert_eq!(batches[1].records[0].pattern, "c");
        assert!(partition(Vec::new(), 10).is_empty());
    }

    #[test]
    fn test_all_batches_succeed() {
        let engine = Engine::new(config(2, 3)).with_backend(Arc::new(FakeBackend));
        let (summary, metrics) = run(engine, &["a", "b", "c", "d", "e"]);
        assert_eq!(summary.succeeded, 5);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.batches, 3);
        assert_eq!(metrics.len(), 5);
        assert!(metrics.iter().all(|m| m.n_simple_paths == 1));
        assert!(metrics.iter().all(|m| m.uses_super_linear_features));

        let seen: BTreeSet<&str> = metrics.iter().map(|m| m.orig_pattern.as_str()).collect();
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn test_invalid_profile_still_succeeds() {
        let engine = Engine::new(config(3, 1)).with_backend(Arc::new(FakeBackend));
        let (summary, metrics) = run(engine, &["a", "(", "b"]);
        assert_eq!(summary.succeeded, 3);
        let invalid: Vec<&RegexMetrics> = metrics.iter().filter(|m| !m.valid_in_c_sharp).collect();
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].n_simple_paths, -1);
    }

    #[test]
    fn test_failed_batch_is_counted_not_dropped() {
        let engine = Engine::new(config(2, 2)).with_backend(Arc::new(FakeBackend));
        let (summary, metrics) = run(engine, &["a", "b", "timeout", "c", "d"]);
        assert_eq!(summary.failed_batches, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(metrics.len(), 3);
        assert_eq!(summary.accounted(), summary.records);
        assert!(metrics.iter().all(|m| m.orig_pattern != "c"));
    }

    #[test]
    fn test_panicking_batch_does_not_abort_run() {
        let engine = Engine::new(config(1, 2)).with_backend(Arc::new(FakeBackend));
        let (summary, metrics) = run(engine, &["a", "panic", "b"]);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(metrics.len(), 2);
    }

    #[test]
    fn test_wrong_profile_count_fails_batch() {
        let engine = Engine::new(config(3, 1)).with_backend(Arc::new(ShortBackend));
        let (summary, metrics) = run(engine, &["a", "b"]);
        assert_eq!(summary.failed, 2);
        assert!(metrics.is_empty());
    }

    #[test]
    fn test_no_record_lost_across_many_batches() {
        let patterns: Vec<String> = (0..97)
            .map(|i| if i % 13 == 0 { "timeout".to_string() } else { format!("p{i}") })
            .collect();
        let refs: Vec<&str> = patterns.iter().map(String::as_str).collect();
        let engine = Engine::new(config(4, 4)).with_backend(Arc::new(FakeBackend));
        let (summary, metrics) = run(engine, &refs);
        assert_eq!(summary.records, 97);
        assert_eq!(summary.accounted(), 97);
        assert_eq!(metrics.len(), summary.succeeded);
        assert!(summary.failed > 0);
    }

    #[test]
    fn test_worst_case_only() {
        let config = Arc::new(MeasureConfig {
            analyses: Analyses {
                worst_case: true,
                ..Analyses::default()
            },
            workers: 1,
            queue_depth: 1,
            ..MeasureConfig::default()
        });
        let engine =
            Engine::new(config).with_oracle(Arc::new(FixedOracle(ComplexityVerdict::Exponential)));
        let (summary, metrics) = run(engine, &["(a+)+$"]);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(
            metrics[0].predicted_worst_case_spencer,
            ComplexityVerdict::Exponential
        );
        assert!(!metrics[0].valid_in_c_sharp);
        assert_eq!(metrics[0].n_simple_paths, -1);
    }

    #[test]
    fn test_missing_backend_fails_batch() {
        let engine = Engine::new(config(2, 1));
        let (summary, _) = run(engine, &["a"]);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_stop_flag_cancels_undispatched_batches() {
        let stop = Arc::new(AtomicBool::new(true));
        let engine = Engine::new(config(2, 1)).with_backend(Arc::new(FakeBackend));
        let mut sink = InMemorySink::new();
        let summary = Scheduler::new(engine)
            .with_stop_flag(stop)
            .run(records(&["a", "b", "c"]), &mut sink)
            .unwrap();
        assert_eq!(summary.cancelled, 3);
        assert_eq!(summary.accounted(), 3);
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_summary_line() {
        let summary = RunSummary {
            records: 3,
            succeeded: 2,
            failed: 1,
            ..RunSummary::default()
        };
        assert_eq!(
            summary.to_string(),
            "Successfully computed metrics for 2/3 (66.67%) of the regexes"
        );
        assert_eq!(RunSummary::default().success_percent(), 0.0);
    }
}
