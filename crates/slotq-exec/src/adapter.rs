//! The execution adapter seam.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use thiserror::Error;

use crate::executor::summary::ResultSummary;

/// Shared flag; once set, in-flight executions terminate their process.
pub type CancelFlag = Arc<AtomicBool>;

/// Errors that prevent an execution from producing an outcome.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("no command to run: payload is empty and no program is configured")]
    EmptyCommand,

    #[error("working directory does not exist: {0}")]
    MissingWorkingDir(PathBuf),

    #[error("failed to start {program}: {reason}")]
    SpawnFailed { program: String, reason: String },
}

/// Result type for adapter operations.
pub type ExecResult<T> = Result<T, ExecError>;

/// What to run.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Job identifier, for logging.
    pub job_id: String,
    /// Opaque payload, passed through verbatim.
    pub payload: Vec<String>,
    /// Directory the process runs in.
    pub working_dir: PathBuf,
}

/// Output line classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Transient progress line (starts with `[`), overwritten in place.
    Progress,
    /// Regular output.
    Normal,
}

impl LineKind {
    pub fn of(line: &str) -> Self {
        if line.starts_with('[') {
            LineKind::Progress
        } else {
            LineKind::Normal
        }
    }
}

/// Returned by a sink to keep going or stop the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineControl {
    Continue,
    Abort,
}

/// Receives each output line as it arrives.
pub trait ProgressSink {
    fn on_line(&mut self, line: &str, kind: LineKind) -> LineControl;
}

impl<F> ProgressSink for F
where
    F: FnMut(&str, LineKind) -> LineControl,
{
    fn on_line(&mut self, line: &str, kind: LineKind) -> LineControl {
        self(line, kind)
    }
}

/// Terminal status of an execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecStatus {
    Success,
    Failed {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Signal name, if the process was killed.
        signal: Option<String>,
    },
    /// Stopped because of the cancel flag or a sink abort.
    Cancelled,
}

/// Outcome of one execution.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub status: ExecStatus,
    /// Last non-empty line the process printed.
    pub last_line: Option<String>,
    /// Result summary parsed from the output, if one was found.
    pub summary: Option<ResultSummary>,
    pub duration_ms: u64,
}

impl ExecOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ExecStatus::Success
    }

    /// Failure code as shown to the operator (`code 3`, `signal SIGKILL`).
    pub fn failure_code(&self) -> Option<String> {
        match &self.status {
            ExecStatus::Failed { code: Some(c), .. } => Some(format!("code {}", c)),
            ExecStatus::Failed {
                signal: Some(s), ..
            } => Some(format!("signal {}", s)),
            ExecStatus::Failed { .. } => Some("code unknown".to_string()),
            _ => None,
        }
    }
}

/// Runs a job's underlying process.
pub trait ExecutionAdapter: Send + Sync {
    /// Run `request` to completion, streaming lines into `sink`.
    ///
    /// Must return promptly with [`ExecStatus::Cancelled`] once `cancel` is
    /// set or the sink answers [`LineControl::Abort`].
    fn execute(
        &self,
        request: &ExecRequest,
        sink: &mut dyn ProgressSink,
        cancel: &CancelFlag,
    ) -> ExecResult<ExecOutcome>;
}
