//! Output sinks for per-regex metrics.
//!
//! A sink receives finished [`RegexMetrics`] in completion order. The
//! scheduler is the only writer, so sinks need not be thread-safe.

use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::metrics::RegexMetrics;

/// Trait for streaming metrics records to storage.
///
/// # Example
///
/// ```ignore
/// let mut sink = NdjsonSink::create(Path::new("metrics.json"))?;
/// sink.write_metrics(&metrics)?;
/// sink.finish()?;
/// ```
pub trait MetricsSink {
    /// Append one record.
    fn write_metrics(&mut self, metrics: &RegexMetrics) -> Result<()>;

    /// Flush any buffered records to storage.
    fn flush(&mut self) -> Result<()>;
}

/// Writes one JSON object per line.
///
/// Each record is serialized in full before it is written, and the writer is
/// line buffered, so a crash never leaves more than the current line
/// incomplete and earlier records are already on disk.
pub struct NdjsonSink<W: Write> {
    writer: LineWriter<W>,
    written: usize,
}

impl NdjsonSink<File> {
    /// Create (or truncate) the output file.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file {}", path.display()))?;
        Ok(Self::new(file))
    }
}

impl<W: Write> NdjsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: LineWriter::new(writer),
            written: 0,
        }
    }

    /// Records written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush output: {}", e.error()))
    }
}

impl<W: Write> MetricsSink for NdjsonSink<W> {
    fn write_metrics(&mut self, metrics: &RegexMetrics) -> Result<()> {
        let mut line = serde_json::to_vec(metrics).context("Failed to serialize metrics")?;
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .context("Failed to write metrics record")?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush output")
    }
}

/// Keeps every record in memory.
///
/// Useful for tests and for callers that post-process the whole run.
#[derive(Default)]
pub struct InMemorySink {
    records: Vec<RegexMetrics>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[RegexMetrics] {
        &self.records
    }

    pub fn into_records(self) -> Vec<RegexMetrics> {
        self.records
    }
}

impl MetricsSink for InMemorySink {
    fn write_metrics(&mut self, metrics: &RegexMetrics) -> Result<()> {
        self.records.push(metrics.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::RegexRecord;
    use crate::graph::PathMetrics;
    use crate::metrics::aggregate;
    use crate::translate::CanonicalPattern;
    use crate::worst_case::ComplexityVerdict;
    use tempfile::TempDir;

    fn metrics(pattern: &str) -> RegexMetrics {
        aggregate(
            &RegexRecord::new(pattern),
            &CanonicalPattern::new(pattern.to_string()),
            None,
            PathMetrics::not_computed(),
            ComplexityVerdict::Unknown,
        )
    }

    #[test]
    fn test_ndjson_one_record_per_line() {
        let mut sink = NdjsonSink::new(Vec::new());
        sink.write_metrics(&metrics("a\nb")).unwrap();
        sink.write_metrics(&metrics("c")).unwrap();
        assert_eq!(sink.written(), 2);

        let out = String::from_utf8(sink.finish().unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: RegexMetrics = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.orig_pattern, "a\nb");
    }

    #[test]
    fn test_records_reach_disk_before_finish() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.json");
        let mut sink = NdjsonSink::create(&path).unwrap();
        sink.write_metrics(&metrics("x")).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        drop(sink);
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        assert!(NdjsonSink::create(&dir.path().join("no/such/dir/out.json")).is_err());
    }

    #[test]
    fn test_in_memory_sink() {
        let mut sink = InMemorySink::new();
        sink.write_metrics(&metrics("a")).unwrap();
        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.into_records()[0].orig_pattern, "a");
    }
}
