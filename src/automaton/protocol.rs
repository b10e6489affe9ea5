//! NDJSON wire format of the automaton tool.
//!
//! Queries are one `{"pattern": ...}` object per line. The tool answers with
//! one line per query, in query order:
//!
//! ```text
//! {"regexMetrics": {"validCSharpRegex": true,
//!                   "featureVector": {"valid": true, "STAR": 1, ...},
//!                   "automataMeasures": {"efreeNFAGraph": "0\n2\n0 1 a\n1 2 b", ...}}}
//! ```
//!
//! Each response line is decoded on its own so one bad line only costs the
//! profile at its position.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use super::{AutomatonProfile, FeatureVector};
use crate::translate::CanonicalPattern;

#[derive(Serialize)]
struct Query<'a> {
    pattern: &'a str,
}

#[derive(Deserialize)]
struct Response {
    #[serde(rename = "regexMetrics")]
    regex_metrics: RawMetrics,
}

#[derive(Deserialize)]
struct RawMetrics {
    #[serde(rename = "validCSharpRegex")]
    valid: bool,
    #[serde(default, rename = "featureVector")]
    feature_vector: Option<Map<String, Value>>,
    #[serde(default, rename = "automataMeasures")]
    automata_measures: Option<Map<String, Value>>,
}

/// Write one query line per pattern.
pub fn write_queries<W: Write>(writer: &mut W, patterns: &[CanonicalPattern]) -> io::Result<()> {
    for pattern in patterns {
        let line = serde_json::to_string(&Query {
            pattern: &pattern.pattern,
        })?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()
}

/// Decode one response line.
pub fn parse_response_line(line: &str) -> Result<AutomatonProfile, serde_json::Error> {
    let response: Response = serde_json::from_str(line)?;
    let raw = response.regex_metrics;
    if !raw.valid {
        return Ok(AutomatonProfile::invalid());
    }

    Ok(AutomatonProfile {
        valid: true,
        features: raw.feature_vector.map(feature_counts).unwrap_or_default(),
        measures: raw.automata_measures.unwrap_or_default(),
    })
}

/// Integer counts from a feature vector whose own `valid` flag holds.
fn feature_counts(mut vector: Map<String, Value>) -> FeatureVector {
    let valid = vector
        .remove("valid")
        .map(|v| v.as_bool().unwrap_or(false))
        .unwrap_or(true);
    if !valid {
        return FeatureVector::new();
    }

    vector
        .into_iter()
        .filter_map(|(name, count)| match count.as_i64() {
            Some(n) => Some((name, n)),
            None => {
                trace!("Ignoring non-integer feature {name}: {count}");
                None
            }
        })
        .collect()
}

/// Decode a whole response stream into exactly one profile per pattern.
pub fn read_profiles(output: &str, patterns: &[CanonicalPattern]) -> Vec<AutomatonProfile> {
    let mut profiles = Vec::with_capacity(patterns.len());
    let mut lines = output.lines();

    for (i, pattern) in patterns.iter().enumerate() {
        let Some(line) = lines.next() else {
            warn!(
                "Automaton tool returned {} of {} results; padding with invalid profiles",
                i,
                patterns.len()
            );
            profiles.resize_with(patterns.len(), AutomatonProfile::invalid);
            return profiles;
        };
        let line = line.trim();
        debug!("Results for regex {} ( /{}/ ): {}", i, pattern.pattern, line);
        match parse_response_line(line) {
            Ok(profile) => profiles.push(profile),
            Err(e) => {
                warn!("Could not parse automaton tool output for regex {i}: {e}");
                profiles.push(AutomatonProfile::invalid());
            }
        }
    }

    let extra = lines.count();
    if extra > 0 {
        warn!("Ignoring {extra} unexpected trailing result lines");
    }
    profiles
}
