//! Measurement configuration.
//!
//! A [`MeasureConfig`] is built once at startup and shared read-only with
//! every worker. Nothing in the engine reads process-wide settings.

use std::time::Duration;

use thiserror::Error;

use crate::subprocess::ToolCommand;
use crate::worst_case::{PatternVariant, DEFAULT_DETECTOR};

/// Number of regexes handed to one automaton tool invocation.
pub const DEFAULT_BATCH_SIZE: usize = 10;
/// Wall-clock budget per regex; a batch gets `batch_size` times this.
pub const DEFAULT_PER_PATTERN_TIMEOUT: Duration = Duration::from_secs(5);
/// Most corpora sit at 1-10 simple paths per regex, so a few thousand is
/// plenty to tell "many" from "few".
pub const DEFAULT_SIMPLE_PATH_COUNT_LIMIT: usize = 5000;
pub const DEFAULT_SIMPLE_PATH_TIME_LIMIT: Duration = Duration::from_secs(5);

/// Configuration errors detected at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no analysis selected; choose at least one of automaton, simple paths, worst case")]
    NoAnalysis,
    #[error("simple path analysis requires automaton analysis")]
    PathsWithoutAutomaton,
    #[error("automaton analysis requires the automaton tool command")]
    MissingAutomataCli,
    #[error("worst-case analysis requires a detector command")]
    MissingDetector,
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Which analyses to run for each regex.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Analyses {
    /// Feature vector and automaton measures from the automaton tool.
    pub automaton: bool,
    /// Simple path count and out-degree density of the e-free NFA.
    pub simple_paths: bool,
    /// Predicted worst-case behavior in a backtracking engine.
    pub worst_case: bool,
}

impl Analyses {
    /// Check that the selection is runnable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.automaton && !self.simple_paths && !self.worst_case {
            return Err(ConfigError::NoAnalysis);
        }
        if self.simple_paths && !self.automaton {
            return Err(ConfigError::PathsWithoutAutomaton);
        }
        Ok(())
    }
}

/// Bounds on the simple path search for one regex.
///
/// `None` disables the corresponding bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathLimits {
    pub count_limit: Option<usize>,
    pub time_limit: Option<Duration>,
}

impl PathLimits {
    pub fn unlimited() -> Self {
        Self {
            count_limit: None,
            time_limit: None,
        }
    }
}

impl Default for PathLimits {
    fn default() -> Self {
        Self {
            count_limit: Some(DEFAULT_SIMPLE_PATH_COUNT_LIMIT),
            time_limit: Some(DEFAULT_SIMPLE_PATH_TIME_LIMIT),
        }
    }
}

/// How to reach the worst-case detector.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub command: ToolCommand,
    /// Detector name passed in each query.
    pub detector: String,
    pub variant: PatternVariant,
}

impl DetectorConfig {
    pub fn new(command: ToolCommand) -> Self {
        Self {
            command,
            detector: DEFAULT_DETECTOR.to_string(),
            variant: PatternVariant::LeftAnchor,
        }
    }
}

/// Engine configuration shared by the scheduler and every worker.
#[derive(Debug, Clone)]
pub struct MeasureConfig {
    pub analyses: Analyses,
    pub batch_size: usize,
    pub per_pattern_timeout: Duration,
    /// Worker threads in the pool.
    pub workers: usize,
    /// Batches submitted to the pool but not yet completed.
    pub queue_depth: usize,
    pub path_limits: PathLimits,
    /// Automaton analysis tool; the query file is appended to its arguments.
    pub automata_cli: Option<ToolCommand>,
    pub detector: Option<DetectorConfig>,
    /// Flag substituted for the unicode flag during translation.
    pub alt_unicode_flag: Option<char>,
    /// Leave query/response/error files behind for inspection.
    pub keep_temp_files: bool,
}

impl Default for MeasureConfig {
    fn default() -> Self {
        let workers = num_cpus::get().max(1);
        MeasureConfig {
            analyses: Analyses::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            per_pattern_timeout: DEFAULT_PER_PATTERN_TIMEOUT,
            workers,
            queue_depth: workers * 2,
            path_limits: PathLimits::default(),
            automata_cli: None,
            detector: None,
            alt_unicode_flag: Some('i'),
            keep_temp_files: false,
        }
    }
}

impl MeasureConfig {
    /// Wall-clock budget for one automaton tool invocation.
    pub fn batch_timeout(&self) -> Duration {
        self.per_pattern_timeout
            .saturating_mul(self.batch_size.min(u32::MAX as usize) as u32)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.analyses.validate()?;
        if self.batch_size == 0 {
            return Err(ConfigError::Zero("batch size"));
        }
        if self.workers == 0 {
            return Err(ConfigError::Zero("worker count"));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::Zero("queue depth"));
        }
        if self.per_pattern_timeout.is_zero() {
            return Err(ConfigError::Zero("per-pattern timeout"));
        }
        if self.analyses.automaton && self.automata_cli.is_none() {
            return Err(ConfigError::MissingAutomataCli);
        }
        if self.analyses.worst_case && self.detector.is_none() {
            return Err(ConfigError::MissingDetector);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyses_require_selection() {
        assert_eq!(Analyses::default().validate(), Err(ConfigError::NoAnalysis));
    }

    #[test]
    fn test_paths_require_automaton() {
        let analyses = Analyses {
            simple_paths: true,
            ..Analyses::default()
        };
        assert_eq!(
            analyses.validate(),
            Err(ConfigError::PathsWithoutAutomaton)
        );

        let analyses = Analyses {
            automaton: true,
            simple_paths: true,
            worst_case: false,
        };
        assert!(analyses.validate().is_ok());
    }

    #[test]
    fn test_batch_timeout_scales_with_batch_size() {
        let config = MeasureConfig {
            batch_size: 10,
            per_pattern_timeout: Duration::from_secs(5),
            ..MeasureConfig::default()
        };
        assert_eq!(config.batch_timeout(), Duration::from_secs(50));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = MeasureConfig {
            analyses: Analyses {
                automaton: true,
                ..Analyses::default()
            },
            batch_size: 0,
            ..MeasureConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("batch size")));
    }

    #[test]
    fn test_worst_case_needs_detector() {
        let config = MeasureConfig {
            analyses: Analyses {
                worst_case: true,
                ..Analyses::default()
            },
            ..MeasureConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::MissingDetector));
    }
}
