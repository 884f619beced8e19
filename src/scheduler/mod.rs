//! Scheduler aggregate
//!
//! Owns the job graph, the slot budget and the running count behind one
//! mutex, plus a condvar and change epoch so an idle worker never misses the
//! wakeup for a change made between its unlock and its wait. Snapshots are
//! captured under the lock and written after releasing it.

pub mod pool;
pub mod slots;

use std::path::PathBuf;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::graph::JobGraph;
use crate::job::{Job, JobState};
use crate::signal::ShutdownToken;
use crate::status::{StatusBoard, StatusView};
use crate::store::{QueueSnapshot, QueueStore, SaveOutcome, StoreError};
use slots::{select_next, Decision};

pub use pool::{WorkerContext, WorkerPool};

/// Upper bound on one idle wait, so shutdown is noticed without a wakeup.
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Message left on a job whose process was stopped by shutdown.
pub const INTERRUPTED_MESSAGE: &str = "interrupted";

/// A job handed to a worker.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub job_id: String,
    pub payload: Vec<String>,
    pub working_dir: PathBuf,
    pub weight: u32,
    pub command_line: String,
}

/// How a worker's execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Completed { message: Option<String> },
    Failed { message: String },
    /// Stopped by shutdown; the job stays running until the next `run`.
    Interrupted,
}

#[derive(Debug)]
struct SchedulerState {
    graph: JobGraph,
    available: i64,
    running: u32,
    epoch: u64,
}

/// Shared scheduling state, passed to workers by `Arc`.
#[derive(Debug)]
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    changed: Condvar,
    store: QueueStore,
    shutdown: ShutdownToken,
    max_slots: u32,
}

impl Scheduler {
    pub fn new(
        graph: JobGraph,
        max_slots: u32,
        store: QueueStore,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                graph,
                available: i64::from(max_slots),
                running: 0,
                epoch: 0,
            }),
            changed: Condvar::new(),
            store,
            shutdown,
            max_slots,
        }
    }

    pub fn max_slots(&self) -> u32 {
        self.max_slots
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until a job is selected for the caller, or return `None` when
    /// the caller should retire.
    pub fn next_job(&self) -> Option<Assignment> {
        let mut state = self.lock();
        loop {
            let epoch = state.epoch;
            let SchedulerState {
                graph,
                available,
                running,
                ..
            } = &mut *state;
            let exiting = self.shutdown.is_triggered();
            let decision = select_next(graph, *available, *running, exiting);
            tracing::debug!(
                ?decision,
                available = *available,
                running = *running,
                "selection pass"
            );

            match decision {
                Decision::Run {
                    index,
                    weight,
                    propagated,
                } => {
                    let Some(job) = state.graph.get(index) else {
                        continue;
                    };
                    let assignment = Assignment {
                        job_id: job.id.clone(),
                        payload: job.payload.clone(),
                        working_dir: job.working_dir.clone(),
                        weight,
                        command_line: job.command_line(),
                    };
                    state.available -= i64::from(weight);
                    state.running += 1;
                    // Dependents failed in this pass may unblock idle workers
                    let snapshot = if propagated {
                        self.publish(&mut state)
                    } else {
                        QueueSnapshot::capture(&state.graph)
                    };
                    drop(state);

                    tracing::info!(job_id = %assignment.job_id, weight, "job started");
                    self.persist(&snapshot);
                    return Some(assignment);
                }
                Decision::Retire { changed } => {
                    if changed {
                        let snapshot = self.publish(&mut state);
                        drop(state);
                        self.persist(&snapshot);
                    }
                    return None;
                }
                Decision::Wait { changed: true } => {
                    let snapshot = self.publish(&mut state);
                    drop(state);
                    self.persist(&snapshot);
                    state = self.lock();
                }
                Decision::Wait { changed: false } => {
                    let (guard, _) = self
                        .changed
                        .wait_timeout_while(state, IDLE_WAIT, |s| {
                            s.epoch == epoch && !self.shutdown.is_triggered()
                        })
                        .unwrap_or_else(|e| e.into_inner());
                    state = guard;
                }
            }
        }
    }

    /// Release the assignment's slots and record its final state.
    pub fn finish(&self, assignment: &Assignment, result: JobResult) {
        let mut state = self.lock();
        state.available += i64::from(assignment.weight);
        state.running = state.running.saturating_sub(1);

        match state.graph.position(&assignment.job_id) {
            Some(index) => {
                if let Some(job) = state.graph.job_mut(index) {
                    record_result(job, &result);
                }
            }
            None => {
                tracing::warn!(job_id = %assignment.job_id, "finished job is no longer queued");
            }
        }

        let snapshot = self.publish(&mut state);
        drop(state);

        tracing::info!(job_id = %assignment.job_id, ?result, "job finished");
        self.persist(&snapshot);
    }

    /// Wake every idle worker so it re-checks shutdown and the graph.
    pub fn wake_all(&self) {
        let mut state = self.lock();
        state.epoch += 1;
        self.changed.notify_all();
    }

    /// Current jobs and counters for rendering.
    pub fn view(&self, board: &StatusBoard) -> StatusView {
        let (jobs, available, running) = {
            let state = self.lock();
            (state.graph.list().to_vec(), state.available, state.running)
        };
        StatusView {
            jobs,
            workers: board.snapshot(),
            available,
            running,
            max_slots: self.max_slots,
        }
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.lock().graph.list().to_vec()
    }

    /// Save the current graph, reporting failure to the caller.
    pub fn persist_now(&self) -> Result<SaveOutcome, StoreError> {
        let snapshot = QueueSnapshot::capture(&self.lock().graph);
        self.store.save(&snapshot)
    }

    /// Bump the epoch, wake waiters, and capture a snapshot.
    fn publish(&self, state: &mut SchedulerState) -> QueueSnapshot {
        state.epoch += 1;
        state.graph.bump();
        self.changed.notify_all();
        QueueSnapshot::capture(&state.graph)
    }

    fn persist(&self, snapshot: &QueueSnapshot) {
        if let Err(e) = self.store.save(snapshot) {
            tracing::warn!(path = %self.store.path().display(), error = %e, "failed to save queue");
        }
    }
}

fn record_result(job: &mut Job, result: &JobResult) {
    let outcome = match result {
        JobResult::Completed { message } => job.transition(JobState::Completed, message.clone()),
        JobResult::Failed { message } => job.transition(JobState::Error, Some(message.clone())),
        JobResult::Interrupted => {
            job.set_message(INTERRUPTED_MESSAGE);
            Ok(())
        }
    };
    if let Err(e) = outcome {
        tracing::warn!(error = %e, "could not record job result");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::ShutdownReason;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn job(name: &str, weight: u32) -> Job {
        Job::new(vec![name.to_string()], weight, "/tmp")
    }

    fn scheduler(dir: &TempDir, jobs: Vec<Job>, max_slots: u32) -> Scheduler {
        let mut graph = JobGraph::new();
        for job in jobs {
            graph.add(job).unwrap();
        }
        let store = QueueStore::new(dir.path().join("queue.json"));
        Scheduler::new(graph, max_slots, store, ShutdownToken::new())
    }

    #[test]
    fn test_next_job_reserves_slots_and_persists() {
        let dir = TempDir::new().unwrap();
        let sched = scheduler(&dir, vec![job("a", 1), job("b", 2)], 2);

        let first = sched.next_job().unwrap();
        assert_eq!(first.payload, vec!["a"]);
        let view = sched.view(&StatusBoard::new(0));
        assert_eq!(view.available, 1);
        assert_eq!(view.running, 1);

        let saved = sched.store().load();
        assert_eq!(saved.get(0).unwrap().state, JobState::Running);
    }

    #[test]
    fn test_finish_records_result_and_releases_slots() {
        let dir = TempDir::new().unwrap();
        let sched = scheduler(&dir, vec![job("a", 2)], 2);

        let a = sched.next_job().unwrap();
        sched.finish(
            &a,
            JobResult::Completed {
                message: Some("10 frames, 2.00 fps, 300 kb/s".into()),
            },
        );

        let jobs = sched.jobs();
        assert_eq!(jobs[0].state, JobState::Completed);
        assert_eq!(
            jobs[0].state_message.as_deref(),
            Some("10 frames, 2.00 fps, 300 kb/s")
        );
        let view = sched.view(&StatusBoard::new(0));
        assert_eq!(view.available, 2);
        assert_eq!(view.running, 0);
        assert!(sched.next_job().is_none());
    }

    #[test]
    fn test_interrupted_job_stays_running() {
        let dir = TempDir::new().unwrap();
        let sched = scheduler(&dir, vec![job("a", 1)], 2);

        let a = sched.next_job().unwrap();
        sched.finish(&a, JobResult::Interrupted);

        let saved = sched.store().load();
        let job = saved.get(0).unwrap();
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.state_message.as_deref(), Some(INTERRUPTED_MESSAGE));
    }

    #[test]
    fn test_waiting_worker_wakes_on_finish() {
        let dir = TempDir::new().unwrap();
        let sched = Arc::new(scheduler(&dir, vec![job("a", 2), job("b", 2)], 2));

        let a = sched.next_job().unwrap();
        let waiter = {
            let sched = Arc::clone(&sched);
            thread::spawn(move || sched.next_job())
        };
        thread::sleep(Duration::from_millis(50));
        sched.finish(&a, JobResult::Completed { message: None });

        let b = waiter.join().unwrap().unwrap();
        assert_eq!(b.payload, vec!["b"]);
    }

    #[test]
    fn test_shutdown_retires_waiting_worker() {
        let dir = TempDir::new().unwrap();
        let mut graph = JobGraph::new();
        graph.add(job("a", 2)).unwrap();
        graph.add(job("b", 2)).unwrap();
        let shutdown = ShutdownToken::new();
        let sched = Arc::new(Scheduler::new(
            graph,
            2,
            QueueStore::new(dir.path().join("queue.json")),
            shutdown.clone(),
        ));

        let _a = sched.next_job().unwrap();
        let waiter = {
            let sched = Arc::clone(&sched);
            thread::spawn(move || sched.next_job())
        };
        thread::sleep(Duration::from_millis(50));
        shutdown.trigger(ShutdownReason::Signal);
        sched.wake_all();

        assert!(waiter.join().unwrap().is_none());
        assert_eq!(sched.jobs()[1].state, JobState::Waiting);
    }

    #[test]
    fn test_failed_dependency_retires_without_running() {
        let dir = TempDir::new().unwrap();
        let first = job("first", 1);
        let second = job("second", 2).with_dependency(first.id.clone());
        let sched = scheduler(&dir, vec![first, second], 2);

        let a = sched.next_job().unwrap();
        sched.finish(
            &a,
            JobResult::Failed {
                message: "exit code 1: boom".into(),
            },
        );

        assert!(sched.next_job().is_none());
        let jobs = sched.jobs();
        assert_eq!(jobs[1].state, JobState::Error);
        assert_eq!(jobs[1].state_message.as_deref(), Some("exit code 1: boom"));
    }

    #[test]
    fn test_start_after_propagated_failure_wakes_waiters() {
        let dir = TempDir::new().unwrap();
        let orphan = job("orphan", 1).with_dependency("01gone");
        let sched = scheduler(&dir, vec![orphan, job("other", 2)], 2);

        let other = sched.next_job().unwrap();
        assert_eq!(other.payload, vec!["other"]);
        assert_eq!(sched.lock().epoch, 1);

        let saved = sched.store().load();
        assert_eq!(saved.get(0).unwrap().state, JobState::Error);
        assert_eq!(saved.get(1).unwrap().state, JobState::Running);
    }

    #[test]
    fn test_plain_start_leaves_epoch() {
        let dir = TempDir::new().unwrap();
        let sched = scheduler(&dir, vec![job("a", 1)], 2);

        sched.next_job().unwrap();
        assert_eq!(sched.lock().epoch, 0);
    }
}
