//! Execution adapters for slotq.
//!
//! An adapter runs one job's underlying process, streams its output lines to
//! a [`ProgressSink`], and reports a terminal [`ExecOutcome`]. Cancellation
//! is cooperative through a shared [`CancelFlag`].
//!
//! Two adapters ship here:
//! - [`ProcessAdapter`]: spawns the external command (production)
//! - [`mock::ScriptedAdapter`]: replays scripted output (tests)

pub mod adapter;
pub mod executor;
pub mod mock;

pub use adapter::{
    CancelFlag, ExecError, ExecOutcome, ExecRequest, ExecResult, ExecStatus, ExecutionAdapter,
    LineControl, LineKind, ProgressSink,
};
pub use executor::summary::{parse_result_line, ResultSummary};
pub use executor::{ProcessAdapter, ProcessConfig};
