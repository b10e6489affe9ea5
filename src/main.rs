use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use regex_metrics::config::{
    Analyses, DetectorConfig, MeasureConfig, PathLimits, DEFAULT_BATCH_SIZE,
    DEFAULT_SIMPLE_PATH_COUNT_LIMIT,
};
use regex_metrics::corpus::CorpusOptions;
use regex_metrics::measure::{measure, tool_command, Config};

#[derive(Debug, Parser)]
#[command(name = "regex-metrics")]
#[command(about = "Measure structural and worst-case properties of a regex corpus")]
#[command(version)]
struct Command {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// NDJSON corpus, one regex record per line
    #[arg(long)]
    regex_file: PathBuf,
    /// Where to write one metrics record per line
    #[arg(long)]
    out_file: PathBuf,
    /// Treat all recorded uses as static uses
    #[arg(long)]
    set_static_to_all: bool,
    /// Feature vector and automaton measures
    #[arg(long)]
    analyze_automaton: bool,
    /// Simple path count and density of the e-free NFA (needs --analyze-automaton)
    #[arg(long)]
    analyze_simple_paths: bool,
    /// Predicted worst-case behavior in a backtracking engine
    #[arg(long)]
    analyze_worst_case: bool,
    /// Only measure regexes used in these registries
    #[arg(long)]
    lang: Vec<String>,
    /// Worker threads (defaults to the number of cores)
    #[arg(long)]
    parallelism: Option<usize>,
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
    /// Seconds allowed per regex
    #[arg(long, default_value = "5")]
    per_regex_timeout: u64,
    #[arg(long, default_value_t = DEFAULT_SIMPLE_PATH_COUNT_LIMIT)]
    simple_path_count_limit: usize,
    /// Seconds allowed for one regex's simple path search
    #[arg(long, default_value = "5")]
    simple_path_time_limit: u64,
    /// Count every simple path, however long it takes
    #[arg(long)]
    no_simple_path_limits: bool,
    /// Automaton analysis tool
    #[arg(long)]
    automata_cli: Option<PathBuf>,
    /// Program that runs the automaton tool (default: wine for .exe tools)
    #[arg(long)]
    automata_launcher: Option<PathBuf>,
    /// Worst-case detector
    #[arg(long)]
    detector_cli: Option<PathBuf>,
    /// Keep query, output and error files of tool invocations
    #[arg(long)]
    keep_temp_files: bool,
}

impl Command {
    fn into_config(self) -> Config {
        let mut measure = MeasureConfig {
            analyses: Analyses {
                automaton: self.analyze_automaton,
                simple_paths: self.analyze_simple_paths,
                worst_case: self.analyze_worst_case,
            },
            batch_size: self.batch_size,
            per_pattern_timeout: Duration::from_secs(self.per_regex_timeout),
            path_limits: PathLimits {
                count_limit: Some(self.simple_path_count_limit),
                time_limit: Some(Duration::from_secs(self.simple_path_time_limit)),
            },
            automata_cli: self
                .automata_cli
                .as_deref()
                .map(|tool| tool_command(tool, self.automata_launcher.as_deref())),
            detector: self
                .detector_cli
                .as_deref()
                .map(|tool| DetectorConfig::new(tool_command(tool, None))),
            keep_temp_files: self.keep_temp_files,
            ..MeasureConfig::default()
        };
        if self.no_simple_path_limits {
            measure.path_limits = PathLimits::unlimited();
        }
        if let Some(workers) = self.parallelism {
            measure.workers = workers;
            measure.queue_depth = workers.saturating_mul(2);
        }

        Config {
            verbosity: self.verbose,
            regex_file: self.regex_file,
            out_file: self.out_file,
            corpus: CorpusOptions {
                set_static_to_all: self.set_static_to_all,
                langs: self.lang,
            },
            measure,
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<ExitCode> {
    let config = Command::parse().into_config();
    init_logging(config.verbosity);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        // Ignore MultipleHandlers errors, the run still completes without one.
        let _ = ctrlc::set_handler(move || {
            if stop.swap(true, Ordering::Relaxed) {
                std::process::exit(130);
            }
            eprintln!("Stopping after in-flight batches finish (Ctrl-C again to abort)");
        });
    }

    let summary = measure(config, Some(stop))?;
    if summary.cancelled > 0 {
        return Ok(ExitCode::from(130));
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let config = Command::parse_from([
            "regex-metrics",
            "--regex-file",
            "in.json",
            "--out-file",
            "out.json",
            "--analyze-automaton",
            "--automata-cli",
            "/opt/automata",
        ])
        .into_config();
        assert_eq!(config.measure.batch_size, 10);
        assert_eq!(config.measure.per_pattern_timeout, Duration::from_secs(5));
        assert_eq!(config.measure.path_limits, PathLimits::default());
        assert!(config.measure.analyses.automaton);
        assert!(config.measure.validate().is_ok());
    }

    #[test]
    fn test_cli_limits_and_langs() {
        let config = Command::parse_from([
            "regex-metrics",
            "-vv",
            "--regex-file",
            "in.json",
            "--out-file",
            "out.json",
            "--analyze-worst-case",
            "--detector-cli",
            "/opt/detector",
            "--no-simple-path-limits",
            "--parallelism",
            "3",
            "--lang",
            "npm",
            "--lang",
            "pypi",
        ])
        .into_config();
        assert_eq!(config.verbosity, 2);
        assert_eq!(config.measure.path_limits, PathLimits::unlimited());
        assert_eq!(config.measure.workers, 3);
        assert_eq!(config.measure.queue_depth, 6);
        assert_eq!(config.corpus.langs, vec!["npm", "pypi"]);
        assert!(config.measure.detector.is_some());
    }
}
