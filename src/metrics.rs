//! Per-regex output records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::automaton::{AutomatonProfile, FeatureVector};
use crate::corpus::RegexRecord;
use crate::graph::PathMetrics;
use crate::translate::CanonicalPattern;
use crate::worst_case::ComplexityVerdict;

/// Feature tags for constructs that can make a backtracking matcher
/// super-linear: lookahead, lookbehind (negative and positive) and
/// backreferences.
pub const SUPER_LINEAR_FEATURES: [&str; 5] = ["NLKA", "LKA", "NLKB", "LKB", "BKR"];

/// Everything measured about one regex, as written to the output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexMetrics {
    pub orig_pattern: String,
    pub orig_langs_static: Vec<String>,
    pub orig_langs_dynamic: Vec<String>,
    /// Pattern in the canonical (C#) dialect; all later metrics describe it.
    pub csharp_pattern: String,
    pub csharp_regex_len: usize,
    pub valid_in_c_sharp: bool,
    pub feature_vector: FeatureVector,
    pub automaton_metrics: Map<String, Value>,
    /// -1 when not computed.
    pub n_simple_paths: i64,
    pub n_distinct_features_used: usize,
    pub predicted_worst_case_spencer: ComplexityVerdict,
    /// |E| / |V|^2 of the e-free NFA, -1 when not computed.
    pub average_out_degree_density: f64,
    pub uses_super_linear_features: bool,
}

/// Number of features that occur at least once.
pub fn distinct_features(features: &FeatureVector) -> usize {
    features.values().filter(|&&count| count > 0).count()
}

/// True if any super-linear feature occurs.
pub fn uses_super_linear_features(features: &FeatureVector) -> bool {
    SUPER_LINEAR_FEATURES
        .iter()
        .any(|tag| features.get(*tag).is_some_and(|&count| count > 0))
}

/// Assemble the metrics of one regex.
///
/// `profile` is `None` when automaton analysis was not run, which reads the
/// same as an invalid profile.
pub fn aggregate(
    record: &RegexRecord,
    canonical: &CanonicalPattern,
    profile: Option<&AutomatonProfile>,
    paths: PathMetrics,
    verdict: ComplexityVerdict,
) -> RegexMetrics {
    let (valid, features, measures) = match profile {
        Some(p) if p.valid => (true, p.features.clone(), p.measures.clone()),
        _ => (false, FeatureVector::new(), Map::new()),
    };

    RegexMetrics {
        orig_pattern: record.pattern.clone(),
        orig_langs_static: record.langs_used_in_static(),
        orig_langs_dynamic: record.langs_used_in_dynamic(),
        csharp_pattern: canonical.pattern.clone(),
        csharp_regex_len: canonical.len,
        valid_in_c_sharp: valid,
        n_distinct_features_used: distinct_features(&features),
        uses_super_linear_features: uses_super_linear_features(&features),
        feature_vector: features,
        automaton_metrics: measures,
        n_simple_paths: paths.simple_paths,
        predicted_worst_case_spencer: verdict,
        average_out_degree_density: paths.density,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> RegexRecord {
        let mut record = RegexRecord::new("(a)\\1");
        record.use_count_static.insert("npm".into(), 3);
        record.use_count_dynamic.insert("pypi".into(), 1);
        record
    }

    fn profile(features: &[(&str, i64)]) -> AutomatonProfile {
        let mut measures = Map::new();
        measures.insert("nfa_orig_nStates".into(), json!(4));
        AutomatonProfile {
            valid: true,
            features: features.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            measures,
        }
    }

    #[test]
    fn test_feature_summaries() {
        let metrics = aggregate(
            &record(),
            &CanonicalPattern::new("(a)\\1".into()),
            Some(&profile(&[("CG", 1), ("BKR", 1), ("STAR", 0)])),
            PathMetrics {
                simple_paths: 1,
                density: 0.25,
            },
            ComplexityVerdict::Exponential,
        );
        assert!(metrics.valid_in_c_sharp);
        assert_eq!(metrics.n_distinct_features_used, 2);
        assert!(metrics.uses_super_linear_features);
        assert_eq!(metrics.csharp_regex_len, 5);
        assert_eq!(metrics.orig_langs_static, vec!["npm"]);
        assert_eq!(metrics.orig_langs_dynamic, vec!["pypi"]);
        assert_eq!(metrics.n_simple_paths, 1);
    }

    #[test]
    fn test_zero_count_super_linear_tag_does_not_count() {
        let features: FeatureVector = [("LKA".to_string(), 0), ("STAR".to_string(), 2)]
            .into_iter()
            .collect();
        assert!(!uses_super_linear_features(&features));
        assert_eq!(distinct_features(&features), 1);
    }

    #[test]
    fn test_invalid_profile_is_empty() {
        let mut invalid = profile(&[("BKR", 1)]);
        invalid.valid = false;
        let metrics = aggregate(
            &record(),
            &CanonicalPattern::new("(".into()),
            Some(&invalid),
            PathMetrics::not_computed(),
            ComplexityVerdict::Unknown,
        );
        assert!(!metrics.valid_in_c_sharp);
        assert!(metrics.feature_vector.is_empty());
        assert!(metrics.automaton_metrics.is_empty());
        assert!(!metrics.uses_super_linear_features);
        assert_eq!(metrics.n_simple_paths, -1);
        assert_eq!(metrics.average_out_degree_density, -1.0);
    }

    #[test]
    fn test_output_keys() {
        let metrics = aggregate(
            &record(),
            &CanonicalPattern::new("a".into()),
            None,
            PathMetrics::not_computed(),
            ComplexityVerdict::Linear,
        );
        let value = serde_json::to_value(&metrics).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        for key in [
            "origPattern",
            "origLangsStatic",
            "origLangsDynamic",
            "csharpPattern",
            "csharpRegexLen",
            "validInCSharp",
            "featureVector",
            "automatonMetrics",
            "nSimplePaths",
            "nDistinctFeaturesUsed",
            "predictedWorstCaseSpencer",
            "averageOutDegreeDensity",
            "usesSuperLinearFeatures",
        ] {
            assert!(keys.contains(&key), "missing {key}");
        }
        assert_eq!(value["predictedWorstCaseSpencer"], json!("LINEAR"));
        assert_eq!(value["validInCSharp"], json!(false));
    }
}
