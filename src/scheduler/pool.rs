//! Worker pool.
//!
//! A fixed set of named OS threads. Each worker asks the scheduler for a job,
//! runs it through the execution adapter outside every lock, reports the
//! result, and repeats until the scheduler tells it to retire.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use slotq_exec::{
    ExecOutcome, ExecRequest, ExecResult, ExecStatus, ExecutionAdapter, LineControl, LineKind,
};

use super::{Assignment, JobResult, Scheduler};
use crate::signal::{ShutdownReason, ShutdownToken};
use crate::status::StatusBoard;

/// Failure message for a job whose adapter panicked.
pub const PANIC_MESSAGE: &str = "worker panicked";

/// Shared handles every worker needs.
#[derive(Clone)]
pub struct WorkerContext {
    pub scheduler: Arc<Scheduler>,
    pub adapter: Arc<dyn ExecutionAdapter>,
    pub board: Arc<StatusBoard>,
    pub shutdown: ShutdownToken,
    /// Output prefix that aborts the whole run
    pub abort_sentinel: Option<String>,
}

#[derive(Default)]
struct Remaining {
    count: Mutex<usize>,
    done: Condvar,
}

/// Decrements the live worker count when a worker exits, even by panic.
struct ExitGuard(Arc<Remaining>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock().unwrap_or_else(|e| e.into_inner());
        *count = count.saturating_sub(1);
        self.0.done.notify_all();
    }
}

/// Handles to the running workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    remaining: Arc<Remaining>,
}

impl WorkerPool {
    /// Start `workers` threads.
    pub fn spawn(workers: usize, context: WorkerContext) -> io::Result<Self> {
        let remaining = Arc::new(Remaining::default());
        let mut handles = Vec::with_capacity(workers);

        for slot in 0..workers {
            *remaining.count.lock().unwrap_or_else(|e| e.into_inner()) += 1;
            let guard = ExitGuard(Arc::clone(&remaining));
            let worker_context = context.clone();
            let handle = thread::Builder::new()
                .name(format!("slotq-worker-{}", slot))
                .spawn(move || {
                    let _guard = guard;
                    worker_loop(slot, &worker_context);
                });
            match handle {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    context.shutdown.trigger(ShutdownReason::Internal);
                    context.scheduler.wake_all();
                    return Err(e);
                }
            }
        }

        tracing::debug!(workers, "worker pool started");
        Ok(Self { handles, remaining })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        *self.remaining.count.lock().unwrap_or_else(|e| e.into_inner()) == 0
    }

    /// Wait up to `timeout` for every worker to exit. Returns true if all have.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let count = self.remaining.count.lock().unwrap_or_else(|e| e.into_inner());
        let (count, _) = self
            .remaining
            .done
            .wait_timeout_while(count, timeout, |count| *count > 0)
            .unwrap_or_else(|e| e.into_inner());
        *count == 0
    }

    /// Join every worker.
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                tracing::warn!("worker thread panicked");
            }
        }
    }
}

fn worker_loop(slot: usize, context: &WorkerContext) {
    while let Some(assignment) = context.scheduler.next_job() {
        context
            .board
            .start(slot, &assignment.job_id, assignment.command_line.clone());
        let result = execute(slot, &assignment, context);
        context.scheduler.finish(&assignment, result);
        context.board.clear(slot);
    }
    tracing::debug!(slot, "worker retired");
}

fn execute(slot: usize, assignment: &Assignment, context: &WorkerContext) -> JobResult {
    let request = ExecRequest {
        job_id: assignment.job_id.clone(),
        payload: assignment.payload.clone(),
        working_dir: assignment.working_dir.clone(),
    };
    let cancel = context.shutdown.cancel_flag();
    let mut sentinel_seen = false;

    let outcome = {
        let mut sink = |line: &str, _kind: LineKind| {
            context.board.update(slot, line);
            let aborts = context
                .abort_sentinel
                .as_deref()
                .map_or(false, |sentinel| line.starts_with(sentinel));
            if aborts {
                sentinel_seen = true;
                tracing::warn!(job_id = %assignment.job_id, line, "abort sentinel in job output");
                context.shutdown.trigger(ShutdownReason::AdapterAborted);
                return LineControl::Abort;
            }
            if context.shutdown.is_triggered() {
                return LineControl::Abort;
            }
            LineControl::Continue
        };
        panic::catch_unwind(AssertUnwindSafe(|| {
            context.adapter.execute(&request, &mut sink, &cancel)
        }))
    };

    // The slots stay reserved until finish runs, so a panic must still yield a result
    let Ok(outcome) = outcome else {
        tracing::error!(job_id = %assignment.job_id, "adapter panicked");
        return JobResult::Failed {
            message: PANIC_MESSAGE.to_string(),
        };
    };

    job_result(outcome, sentinel_seen, context.shutdown.is_triggered())
}

/// Map an execution outcome onto the job's final state.
pub(crate) fn job_result(
    outcome: ExecResult<ExecOutcome>,
    sentinel_seen: bool,
    shutting_down: bool,
) -> JobResult {
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            return JobResult::Failed {
                message: e.to_string(),
            }
        }
    };

    if sentinel_seen || outcome.status == ExecStatus::Cancelled {
        return JobResult::Interrupted;
    }
    if outcome.is_success() {
        return JobResult::Completed {
            message: outcome.summary.map(|s| s.to_string()),
        };
    }
    // A child killed by the terminal's interrupt exits with a failure status
    if shutting_down {
        return JobResult::Interrupted;
    }

    let code = outcome
        .failure_code()
        .unwrap_or_else(|| "code unknown".to_string());
    let message = match outcome.last_line {
        Some(line) => format!("exit {}: {}", code, line),
        None => format!("exit {}", code),
    };
    JobResult::Failed { message }
}
