//! Running external analysis tools under a wall-clock budget.
//!
//! Tool output is redirected to files rather than pipes so a verbose tool can
//! never block on a full pipe while we wait for it.

use std::env;
use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Errors from a single tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("exited with {0}")]
    Exit(ExitStatus),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("program not found: {0}")]
    NotFound(String),
}

/// An external program plus the arguments that precede the per-call input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Resolve the program to an existing file, searching `PATH` for bare
    /// names.
    pub fn resolve(mut self) -> Result<Self, ToolError> {
        let found = find_program(&self.program)
            .ok_or_else(|| ToolError::NotFound(self.program.display().to_string()))?;
        self.program = found;
        Ok(self)
    }

    /// Human-readable command line for logs.
    pub fn display_with(&self, input: &Path) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.push(input.display().to_string());
        parts.join(" ")
    }

    /// Run the tool on `input`, writing its stdout and stderr to the given
    /// files. The child is killed if it runs past `timeout`.
    pub fn run(
        &self,
        input: &Path,
        stdout: File,
        stderr: File,
        timeout: Duration,
    ) -> Result<(), ToolError> {
        debug!("CMD: {}", self.display_with(input));
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let started = Instant::now();
        loop {
            match child.try_wait()? {
                Some(status) if status.success() => return Ok(()),
                Some(status) => return Err(ToolError::Exit(status)),
                None => {
                    if started.elapsed() >= timeout {
                        let _ = child.kill();
                        child.wait()?;
                        return Err(ToolError::Timeout(timeout));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }
}

fn find_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return program.is_file().then(|| program.to_path_buf());
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
