//! Child process execution
//!
//! Runs exactly one external runnable per call with a working directory,
//! an environment and a hard wall clock timeout. Standard output and
//! standard error are captured separately, up to a per-stream cap.
//!
//! On unix the child leads its own process group, so a timeout kills the
//! whole tree the runnable started, not only the interpreter.

use std::time::Duration;

use thiserror::Error;

pub use crate::process::command::{DEFAULT_MAX_OUTPUT_BYTES, ProcessCommand};
pub use crate::process::run::{probe, run};

mod command;
mod run;

/// Errors that occur while running a child process
///
/// A non-zero exit status is not an error at this layer; it is reported
/// through [`RunOutcome`](crate::types::RunOutcome).
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("empty command")]
    EmptyCommand,

    #[error("program '{program}' not found")]
    NotFound {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process timed out after {} seconds", timeout.as_secs())]
    Timeout {
        timeout: Duration,
        elapsed: Duration,
        /// Output captured before the process was killed
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        stdout_truncated: bool,
        stderr_truncated: bool,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProcessError::Timeout { .. })
    }
}
