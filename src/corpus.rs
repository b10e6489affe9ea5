//! Regex corpus records and NDJSON loading.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::translate::Dialect;

/// One regex from the corpus and the ecosystems it was observed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegexRecord {
    pub pattern: String,
    /// Flags the regex was compiled with, if the extractor recorded them.
    #[serde(default)]
    pub flags: String,
    /// Registry name to number of modules using the regex.
    #[serde(default, rename = "useCount_registry_to_nModules")]
    pub use_count: BTreeMap<String, u64>,
    #[serde(default, rename = "useCount_registry_to_nModules_static")]
    pub use_count_static: BTreeMap<String, u64>,
    #[serde(default, rename = "useCount_registry_to_nModules_dynamic")]
    pub use_count_dynamic: BTreeMap<String, u64>,
}

impl RegexRecord {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            flags: String::new(),
            use_count: BTreeMap::new(),
            use_count_static: BTreeMap::new(),
            use_count_dynamic: BTreeMap::new(),
        }
    }

    /// Registries this regex appeared in statically.
    pub fn langs_used_in_static(&self) -> Vec<String> {
        self.use_count_static.keys().cloned().collect()
    }

    /// Registries this regex appeared in dynamically.
    pub fn langs_used_in_dynamic(&self) -> Vec<String> {
        self.use_count_dynamic.keys().cloned().collect()
    }

    /// Every registry this regex appeared in, sorted and deduplicated.
    pub fn langs_used_in(&self) -> Vec<String> {
        let mut langs: Vec<String> = self
            .use_count
            .keys()
            .chain(self.use_count_static.keys())
            .chain(self.use_count_dynamic.keys())
            .cloned()
            .collect();
        langs.sort();
        langs.dedup();
        langs
    }

    /// Dialect the pattern was written in, taken from the first registry
    /// with a known language.
    pub fn dialect(&self) -> Dialect {
        self.langs_used_in()
            .iter()
            .find_map(|reg| Dialect::from_registry(reg))
            .unwrap_or(Dialect::Unknown)
    }

    /// True if the regex was used in any of `langs` (case-insensitive).
    pub fn used_in_any(&self, langs: &[String]) -> bool {
        self.langs_used_in()
            .iter()
            .any(|used| langs.iter().any(|l| l.eq_ignore_ascii_case(used)))
    }
}

/// Options applied while loading a corpus.
#[derive(Debug, Clone, Default)]
pub struct CorpusOptions {
    /// Treat every recorded use as a static use. Only valid for corpora that
    /// never recorded static use separately.
    pub set_static_to_all: bool,
    /// Keep only regexes used in one of these registries; empty keeps all.
    pub langs: Vec<String>,
}

/// The loaded corpus plus what was dropped along the way.
#[derive(Debug, Default)]
pub struct Corpus {
    pub records: Vec<RegexRecord>,
    /// Lines that could not be turned into a record.
    pub malformed: usize,
    /// Records dropped by the empty-pattern and language filters.
    pub filtered: usize,
}

/// Parse a single corpus line.
pub fn parse_record(line: &str, opts: &CorpusOptions) -> Result<RegexRecord> {
    let mut record: RegexRecord = serde_json::from_str(line)?;
    if opts.set_static_to_all {
        if !record.use_count_static.is_empty() {
            bail!("set_static_to_all requested but static language use is already populated");
        }
        record.use_count_static = record.use_count.clone();
    }
    Ok(record)
}

/// Load regexes from an NDJSON file. Malformed lines are logged and skipped.
pub fn load_corpus(path: &Path, opts: &CorpusOptions) -> Result<Corpus> {
    info!("Loading regexes from {}", path.display());
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let corpus = read_corpus(BufReader::new(file), opts)?;
    info!(
        "Loaded {} regexes from {} ({} malformed, {} filtered)",
        corpus.records.len(),
        path.display(),
        corpus.malformed,
        corpus.filtered
    );
    Ok(corpus)
}

/// Load regexes from any line-oriented reader.
pub fn read_corpus<R: BufRead>(reader: R, opts: &CorpusOptions) -> Result<Corpus> {
    let mut corpus = Corpus::default();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line.context("reading corpus")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record = match parse_record(line, opts) {
            Ok(record) => record,
            Err(e) => {
                warn!("Exception parsing line {}: {}\n  {}", lineno + 1, e, line);
                corpus.malformed += 1;
                continue;
            }
        };

        if record.pattern.is_empty() {
            debug!("Skipping empty pattern on line {}", lineno + 1);
            corpus.filtered += 1;
            continue;
        }
        if !opts.langs.is_empty() && !record.used_in_any(&opts.langs) {
            corpus.filtered += 1;
            continue;
        }
        corpus.records.push(record);
    }

    if !opts.langs.is_empty() {
        info!(
            "Filtered for regexes used in {:?}: {} remaining",
            opts.langs,
            corpus.records.len()
        );
    }
    Ok(corpus)
}
