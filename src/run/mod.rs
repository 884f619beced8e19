//! The `run` command.
//!
//! Loads the queue, returns jobs left running by an earlier run to waiting,
//! starts the worker pool, and redraws status every refresh interval until
//! the workers retire or shutdown is requested. The final queue state is
//! always persisted before returning.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use slotq_exec::ExecutionAdapter;
use thiserror::Error;

use crate::config::Settings;
use crate::scheduler::{Scheduler, WorkerContext, WorkerPool};
use crate::signal::{ShutdownReason, ShutdownToken, EXIT_CODE_INTERRUPTED};
use crate::status::{StatusBoard, StatusReporter};
use crate::store::{QueueStore, StoreError};

/// Errors that abort a run
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to start workers: {0}")]
    Spawn(#[from] io::Error),

    #[error("failed to save queue: {0}")]
    Store(#[from] StoreError),
}

/// Parameters for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_slots: u32,
    pub workers: usize,
    pub refresh_interval: Duration,
    pub abort_sentinel: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_slots: 2,
            workers: 2,
            refresh_interval: Duration::from_secs(1),
            abort_sentinel: None,
        }
    }
}

impl RunOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_slots: settings.max_slots,
            workers: settings.worker_count(),
            refresh_interval: Duration::from_secs(settings.refresh_interval_secs),
            abort_sentinel: settings.abort_sentinel().map(String::from),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No waiting or running jobs remain
    Completed,
    Interrupted(ShutdownReason),
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::Interrupted(_) => EXIT_CODE_INTERRUPTED,
        }
    }
}

/// Execute the queue until it drains or shutdown is requested.
pub fn run_queue(
    store: QueueStore,
    options: &RunOptions,
    adapter: Arc<dyn ExecutionAdapter>,
    shutdown: ShutdownToken,
    reporter: &mut dyn StatusReporter,
) -> Result<RunOutcome, RunError> {
    let mut graph = store.load();
    let reset = graph.reset_interrupted();
    if reset > 0 {
        tracing::info!(jobs = reset, "reset jobs left running by a previous run");
    }
    store.save_graph(&graph)?;

    tracing::info!(
        jobs = graph.len(),
        max_slots = options.max_slots,
        workers = options.workers,
        "run started"
    );

    let scheduler = Arc::new(Scheduler::new(
        graph,
        options.max_slots,
        store,
        shutdown.clone(),
    ));
    let board = Arc::new(StatusBoard::new(options.workers));
    let pool = WorkerPool::spawn(
        options.workers,
        WorkerContext {
            scheduler: Arc::clone(&scheduler),
            adapter,
            board: Arc::clone(&board),
            shutdown: shutdown.clone(),
            abort_sentinel: options.abort_sentinel.clone(),
        },
    )?;

    let mut shutdown_seen = false;
    loop {
        render(reporter, &scheduler, &board);
        if pool.wait_timeout(options.refresh_interval) {
            break;
        }
        if shutdown.is_triggered() {
            if !shutdown_seen {
                shutdown_seen = true;
                scheduler.wake_all();
            }
            if shutdown.is_immediate() {
                tracing::warn!("not waiting for running workers");
                break;
            }
        }
    }

    let finished = pool.is_finished();
    if finished {
        pool.join();
    }

    scheduler.persist_now()?;
    render(reporter, &scheduler, &board);

    let outcome = match shutdown.reason() {
        Some(reason) => RunOutcome::Interrupted(reason),
        None => RunOutcome::Completed,
    };
    tracing::info!(?outcome, workers_finished = finished, "run finished");
    Ok(outcome)
}

fn render(reporter: &mut dyn StatusReporter, scheduler: &Scheduler, board: &StatusBoard) {
    if let Err(e) = reporter.render(&scheduler.view(board)) {
        tracing::warn!(error = %e, "failed to render status");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunOutcome::Completed.exit_code(), 0);
        assert_eq!(
            RunOutcome::Interrupted(ShutdownReason::Signal).exit_code(),
            EXIT_CODE_INTERRUPTED
        );
    }

    #[test]
    fn test_default_options() {
        let options = RunOptions::default();
        assert_eq!(options.max_slots, 2);
        assert_eq!(options.workers, 2);
        assert_eq!(options.refresh_interval, Duration::from_secs(1));
    }
}
