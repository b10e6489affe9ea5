//! Predicted worst-case matching behavior.
//!
//! The prediction comes from an external static analysis detector that
//! reports opinions about how a backtracking (Spencer-style) engine would
//! behave on a pattern.

use std::fmt;
use std::fs;
use std::io::Write;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::Builder;
use tracing::{debug, warn};

use crate::subprocess::{ToolCommand, ToolError};

/// Detector queried unless configured otherwise.
pub const DEFAULT_DETECTOR: &str = "weideman-RegexStaticAnalysis";

/// Predicted complexity class, ordered from harmless to catastrophic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplexityVerdict {
    /// Not requested, or no usable opinion.
    #[default]
    Unknown,
    Linear,
    Polynomial,
    Exponential,
}

impl ComplexityVerdict {
    /// Parse a detector's opinion token.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_uppercase().as_str() {
            "LINEAR" => ComplexityVerdict::Linear,
            "POLYNOMIAL" | "POLY" => ComplexityVerdict::Polynomial,
            "EXPONENTIAL" | "EXP" => ComplexityVerdict::Exponential,
            _ => ComplexityVerdict::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityVerdict::Unknown => "UNKNOWN",
            ComplexityVerdict::Linear => "LINEAR",
            ComplexityVerdict::Polynomial => "POLYNOMIAL",
            ComplexityVerdict::Exponential => "EXPONENTIAL",
        }
    }

    pub fn is_super_linear(&self) -> bool {
        matches!(
            self,
            ComplexityVerdict::Polynomial | ComplexityVerdict::Exponential
        )
    }
}

impl fmt::Display for ComplexityVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Form of the pattern the detector should analyze.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternVariant {
    /// The pattern as a partial match, i.e. anchored only on the left.
    LeftAnchor,
}

impl PatternVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternVariant::LeftAnchor => "leftanchor",
        }
    }
}

/// Source of worst-case predictions.
///
/// Implementations never fail: anything that goes wrong is reported as
/// [`ComplexityVerdict::Unknown`].
pub trait WorstCaseOracle: Send + Sync {
    fn predict(&self, pattern: &str) -> ComplexityVerdict;
}

#[derive(Serialize)]
struct DetectorQuery<'a> {
    pattern: &'a str,
    detectors: [&'a str; 1],
    #[serde(rename = "patternVariants")]
    pattern_variants: [&'a str; 1],
}

#[derive(Deserialize)]
struct DetectorReport {
    #[serde(rename = "detectorOpinions", default)]
    opinions: Vec<DetectorOpinion>,
}

#[derive(Deserialize)]
struct DetectorOpinion {
    name: String,
    #[serde(rename = "patternVariant")]
    pattern_variant: String,
    opinion: Opinion,
}

#[derive(Deserialize)]
struct Opinion {
    #[serde(rename = "canAnalyze", default)]
    can_analyze: bool,
    #[serde(rename = "predictedComplexity", default)]
    predicted_complexity: Option<String>,
}

/// Runs the detector once per pattern.
#[derive(Debug, Clone)]
pub struct DetectorOracle {
    command: ToolCommand,
    detector: String,
    variant: PatternVariant,
    timeout: Duration,
}

impl DetectorOracle {
    pub fn new(
        command: ToolCommand,
        detector: impl Into<String>,
        variant: PatternVariant,
        timeout: Duration,
    ) -> Self {
        Self {
            command,
            detector: detector.into(),
            variant,
            timeout,
        }
    }

    fn query(&self, pattern: &str) -> Result<String, ToolError> {
        let mut query_file = Builder::new()
            .prefix("RegexMetrics-detectorQuery-")
            .suffix(".json")
            .tempfile()?;
        let out_file = Builder::new().prefix("RegexMetrics-detectorOut-").tempfile()?;
        let err_file = Builder::new().prefix("RegexMetrics-detectorErr-").tempfile()?;

        let query = DetectorQuery {
            pattern,
            detectors: [self.detector.as_str()],
            pattern_variants: [self.variant.as_str()],
        };
        serde_json::to_writer(&mut query_file, &query).map_err(std::io::Error::from)?;
        query_file.flush()?;

        if let Err(e) = self.command.run(
            query_file.path(),
            out_file.reopen()?,
            err_file.reopen()?,
            self.timeout,
        ) {
            if let Ok(bytes) = fs::read(err_file.path()) {
                for line in String::from_utf8_lossy(&bytes).lines() {
                    debug!("  {}", line.trim());
                }
            }
            return Err(e);
        }

        let bytes = fs::read(out_file.path())?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Worst opinion among those from our detector and variant.
    fn verdict(&self, report: &DetectorReport) -> ComplexityVerdict {
        report
            .opinions
            .iter()
            .filter(|o| o.name == self.detector && o.pattern_variant == self.variant.as_str())
            .filter(|o| o.opinion.can_analyze)
            .filter_map(|o| o.opinion.predicted_complexity.as_deref())
            .map(ComplexityVerdict::from_token)
            .max()
            .unwrap_or_default()
    }
}

impl WorstCaseOracle for DetectorOracle {
    fn predict(&self, pattern: &str) -> ComplexityVerdict {
        let output = match self.query(pattern) {
            Ok(output) => output,
            Err(e) => {
                warn!("worst-case detector failed on /{pattern}/: {e}");
                return ComplexityVerdict::Unknown;
            }
        };
        match serde_json::from_str::<DetectorReport>(output.trim()) {
            Ok(report) => {
                let verdict = self.verdict(&report);
                debug!("/{pattern}/: predicted worst case {verdict}");
                verdict
            }
            Err(e) => {
                warn!("could not parse worst-case detector output for /{pattern}/: {e}");
                ComplexityVerdict::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens() {
        assert_eq!(ComplexityVerdict::from_token("LINEAR"), ComplexityVerdict::Linear);
        assert_eq!(ComplexityVerdict::from_token("POLY"), ComplexityVerdict::Polynomial);
        assert_eq!(
            ComplexityVerdict::from_token("exponential"),
            ComplexityVerdict::Exponential
        );
        assert_eq!(ComplexityVerdict::from_token("???"), ComplexityVerdict::Unknown);
    }

    #[test]
    fn test_ordering_puts_exponential_last() {
        assert!(ComplexityVerdict::Unknown < ComplexityVerdict::Linear);
        assert!(ComplexityVerdict::Linear < ComplexityVerdict::Polynomial);
        assert!(ComplexityVerdict::Polynomial < ComplexityVerdict::Exponential);
        assert!(ComplexityVerdict::Exponential.is_super_linear());
        assert!(!ComplexityVerdict::Linear.is_super_linear());
    }

    #[test]
    fn test_serializes_as_token() {
        assert_eq!(
            serde_json::to_string(&ComplexityVerdict::Polynomial).unwrap(),
            "\"POLYNOMIAL\""
        );
        assert_eq!(
            serde_json::to_string(&ComplexityVerdict::default()).unwrap(),
            "\"UNKNOWN\""
        );
    }

    #[test]
    fn test_verdict_picks_worst_matching_opinion() {
        let oracle = DetectorOracle::new(
            ToolCommand::new("unused"),
            DEFAULT_DETECTOR,
            PatternVariant::LeftAnchor,
            Duration::from_secs(1),
        );
        let report: DetectorReport = serde_json::from_str(
            r#"{"detectorOpinions": [
                {"name": "weideman-RegexStaticAnalysis", "patternVariant": "leftanchor",
                 "opinion": {"canAnalyze": true, "predictedComplexity": "POLYNOMIAL"}},
                {"name": "weideman-RegexStaticAnalysis", "patternVariant": "leftanchor",
                 "opinion": {"canAnalyze": true, "predictedComplexity": "LINEAR"}},
                {"name": "weideman-RegexStaticAnalysis", "patternVariant": "fullmatch",
                 "opinion": {"canAnalyze": true, "predictedComplexity": "EXPONENTIAL"}},
                {"name": "rxxr2", "patternVariant": "leftanchor",
                 "opinion": {"canAnalyze": true, "predictedComplexity": "EXPONENTIAL"}},
                {"name": "weideman-RegexStaticAnalysis", "patternVariant": "leftanchor",
                 "opinion": {"canAnalyze": false, "predictedComplexity": "EXPONENTIAL"}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(oracle.verdict(&report), ComplexityVerdict::Polynomial);

        let empty: DetectorReport = serde_json::from_str("{}").unwrap();
        assert_eq!(oracle.verdict(&empty), ComplexityVerdict::Unknown);
    }

    #[cfg(unix)]
    mod detector {
        use super::*;
        use tempfile::TempDir;

        fn oracle(dir: &TempDir, body: &str, timeout: Duration) -> DetectorOracle {
            let path = dir.path().join("detector.sh");
            fs::write(&path, body).unwrap();
            DetectorOracle::new(
                ToolCommand::new("sh").arg(path),
                DEFAULT_DETECTOR,
                PatternVariant::LeftAnchor,
                timeout,
            )
        }

        #[test]
        fn test_detector_reads_query() {
            let dir = TempDir::new().unwrap();
            // Exponential only when the query carries the expected variant.
            let body = r#"if grep -qF '"patternVariants":["leftanchor"]' "$1"; then
  printf '%s\n' '{"detectorOpinions":[{"name":"weideman-RegexStaticAnalysis","patternVariant":"leftanchor","opinion":{"canAnalyze":true,"predictedComplexity":"EXPONENTIAL"}}]}'
else
  echo '{}'
fi
"#;
            let oracle = oracle(&dir, body, Duration::from_secs(10));
            assert_eq!(oracle.predict("(a+)+$"), ComplexityVerdict::Exponential);
        }

        #[test]
        fn test_detector_failures_are_unknown() {
            let dir = TempDir::new().unwrap();
            let oracle_exit = oracle(&dir, "exit 2\n", Duration::from_secs(10));
            assert_eq!(oracle_exit.predict("a"), ComplexityVerdict::Unknown);

            let dir = TempDir::new().unwrap();
            let oracle_garbage = oracle(&dir, "echo not json\n", Duration::from_secs(10));
            assert_eq!(oracle_garbage.predict("a"), ComplexityVerdict::Unknown);

            let dir = TempDir::new().unwrap();
            let oracle_slow = oracle(&dir, "exec sleep 30\n", Duration::from_millis(200));
            assert_eq!(oracle_slow.predict("a"), ComplexityVerdict::Unknown);
        }
    }
}
