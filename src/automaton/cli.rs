//! Backend that drives the external automaton tool.

use std::fs;
use std::io;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};
use tracing::{debug, info, warn};

use super::{protocol, AnalysisBackend, AutomatonProfile};
use crate::subprocess::{ToolCommand, ToolError};
use crate::translate::CanonicalPattern;

/// Runs the automaton tool once per batch over a query file.
///
/// The tool is much cheaper per regex when given a whole batch, since each
/// launch pays for process start-up (and, off Windows, an emulation layer).
#[derive(Debug, Clone)]
pub struct AutomataCli {
    command: ToolCommand,
    timeout: Duration,
    keep_temp_files: bool,
}

impl AutomataCli {
    /// `timeout` bounds one whole-batch invocation.
    pub fn new(command: ToolCommand, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
            keep_temp_files: false,
        }
    }

    pub fn keep_temp_files(mut self, keep: bool) -> Self {
        self.keep_temp_files = keep;
        self
    }

    fn temp_file(prefix: &str) -> io::Result<NamedTempFile> {
        Builder::new().prefix(prefix).suffix(".json").tempfile()
    }

    fn finish(&self, files: [NamedTempFile; 3]) {
        if !self.keep_temp_files {
            return;
        }
        for file in files {
            match file.keep() {
                Ok((_, path)) => debug!("Kept {}", path.display()),
                Err(e) => warn!("Failed to keep temp file: {e}"),
            }
        }
    }
}

impl AnalysisBackend for AutomataCli {
    fn analyze(&self, patterns: &[CanonicalPattern]) -> Result<Vec<AutomatonProfile>, ToolError> {
        let mut query_file = Self::temp_file("RegexMetrics-queryFile-")?;
        let out_file = Self::temp_file("RegexMetrics-OutFile-")?;
        let err_file = Self::temp_file("RegexMetrics-ErrFile-")?;
        debug!(
            "queryFile {} outFile {} errFile {}",
            query_file.path().display(),
            out_file.path().display(),
            err_file.path().display()
        );

        protocol::write_queries(&mut query_file, patterns)?;

        let result = self.command.run(
            query_file.path(),
            out_file.reopen()?,
            err_file.reopen()?,
            self.timeout,
        );

        if let Err(e) = result {
            warn!(
                "automaton tool failed on {} patterns: {} -- check queryFile {} errFile {}",
                patterns.len(),
                e,
                query_file.path().display(),
                err_file.path().display()
            );
            match fs::read(err_file.path()) {
                Ok(bytes) => {
                    for line in String::from_utf8_lossy(&bytes).lines() {
                        warn!("  {}", line.trim());
                    }
                }
                Err(read_err) => warn!("  (could not read error file: {read_err})"),
            }
            self.finish([query_file, out_file, err_file]);
            return Err(e);
        }

        // The tool's output is not always clean UTF-8.
        let bytes = fs::read(out_file.path())?;
        let output = String::from_utf8_lossy(&bytes);
        let profiles = protocol::read_profiles(&output, patterns);
        info!(
            "automaton tool analyzed {} patterns ({} valid)",
            patterns.len(),
            profiles.iter().filter(|p| p.valid).count()
        );

        self.finish([query_file, out_file, err_file]);
        Ok(profiles)
    }
}
