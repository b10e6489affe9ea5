//! Top-level measurement run.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::automaton::AutomataCli;
use crate::config::MeasureConfig;
use crate::corpus::{load_corpus, CorpusOptions};
use crate::output::NdjsonSink;
use crate::scheduler::{Engine, RunSummary, Scheduler};
use crate::subprocess::ToolCommand;
use crate::worst_case::DetectorOracle;

/// Launcher used for Windows executables on other hosts.
pub const DEFAULT_EXE_LAUNCHER: &str = "wine";

/// Configuration for a measurement run.
/// This struct contains all the runtime options needed by the measure()
/// function, separated from the CLI parsing concerns.
#[derive(Debug, Clone)]
pub struct Config {
    /// Verbosity level (0 = warn, 1 = info, 2 = debug, 3+ = trace)
    pub verbosity: u8,
    /// NDJSON corpus of regexes
    pub regex_file: PathBuf,
    /// NDJSON metrics output, truncated at start
    pub out_file: PathBuf,
    pub corpus: CorpusOptions,
    pub measure: MeasureConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            verbosity: 0,
            regex_file: PathBuf::new(),
            out_file: PathBuf::from("regex-metrics.json"),
            corpus: CorpusOptions::default(),
            measure: MeasureConfig::default(),
        }
    }
}

/// Build the command that runs `tool`.
///
/// A `.exe` on a non-Windows host runs under `launcher`, or under wine when
/// no launcher is given.
pub fn tool_command(tool: &Path, launcher: Option<&Path>) -> ToolCommand {
    let is_exe = tool
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"));
    match launcher {
        Some(launcher) => ToolCommand::new(launcher).arg(tool),
        None if is_exe && !cfg!(windows) => ToolCommand::new(DEFAULT_EXE_LAUNCHER).arg(tool),
        None => ToolCommand::new(tool),
    }
}

/// Resolve a tool command's program, and its first argument when that is the
/// tool run by a launcher.
fn resolve_tool(command: ToolCommand, what: &str) -> Result<ToolCommand> {
    if let Some(first) = command.args.first() {
        let launched = Path::new(first);
        if launched
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"))
            && !launched.is_file()
        {
            bail!("{what} not found: {}", launched.display());
        }
    }
    let resolved = command
        .resolve()
        .with_context(|| format!("{what} is not available"))?;
    debug!("{what}: {}", resolved.program.display());
    Ok(resolved)
}

/// Build the engine for a validated configuration.
fn build_engine(config: MeasureConfig) -> Result<Engine> {
    let mut config = config;
    if let Some(command) = config.automata_cli.take() {
        config.automata_cli = Some(resolve_tool(command, "automaton tool")?);
    }
    if let Some(mut detector) = config.detector.take() {
        detector.command = resolve_tool(detector.command, "worst-case detector")?;
        config.detector = Some(detector);
    }

    let config = Arc::new(config);
    let mut engine = Engine::new(Arc::clone(&config));
    if config.analyses.automaton {
        if let Some(command) = &config.automata_cli {
            let backend = AutomataCli::new(command.clone(), config.batch_timeout())
                .keep_temp_files(config.keep_temp_files);
            engine = engine.with_backend(Arc::new(backend));
        }
    }
    if config.analyses.worst_case {
        if let Some(detector) = &config.detector {
            let oracle = DetectorOracle::new(
                detector.command.clone(),
                detector.detector.clone(),
                detector.variant,
                config.per_pattern_timeout,
            );
            engine = engine.with_oracle(Arc::new(oracle));
        }
    }
    Ok(engine)
}

/// Measure every regex in the corpus and write one metrics record per line.
///
/// Only configuration problems, an unreadable corpus and output failures
/// are errors; failed batches are counted in the returned summary.
pub fn measure(config: Config, stop: Option<Arc<AtomicBool>>) -> Result<RunSummary> {
    config
        .measure
        .validate()
        .context("Invalid measurement configuration")?;
    info!(
        "regex_file {} out_file {} analyses {:?} langs {:?} workers {}",
        config.regex_file.display(),
        config.out_file.display(),
        config.measure.analyses,
        config.corpus.langs,
        config.measure.workers
    );

    let engine = build_engine(config.measure)?;

    println!("Loading regexes from {}", config.regex_file.display());
    let corpus = load_corpus(&config.regex_file, &config.corpus)
        .with_context(|| format!("Failed to load corpus {}", config.regex_file.display()))?;
    println!("Loaded {} regexes", corpus.records.len());
    if corpus.malformed > 0 {
        warn!("Skipped {} malformed corpus lines", corpus.malformed);
    }

    let mut sink = NdjsonSink::create(&config.out_file)?;
    let mut scheduler = Scheduler::new(engine);
    if let Some(stop) = stop {
        scheduler = scheduler.with_stop_flag(stop);
    }
    let summary = scheduler.run(corpus.records, &mut sink)?;
    sink.finish()?;

    println!("{summary}");
    if summary.failed > 0 {
        println!(
            "{} regexes in {} batches failed",
            summary.failed, summary.failed_batches
        );
    }
    if summary.cancelled > 0 {
        println!("{} regexes were not measured (interrupted)", summary.cancelled);
    }
    println!("Wrote metrics to {}", config.out_file.display());
    Ok(summary)
}
