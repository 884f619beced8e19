//! Slot allocation.
//!
//! One selection pass, run by an idle worker while it holds the scheduler
//! lock. Lighter jobs are preferred; within a weight, queue order wins. The
//! budget ceiling is the available slot count while anything runs, and the
//! heaviest job's weight when nothing does, so an oversized job can still run
//! alone.

use std::collections::BTreeSet;

use crate::graph::JobGraph;
use crate::job::JobState;

/// Message recorded on jobs whose dependencies can never complete.
pub const UNRESOLVABLE_MESSAGE: &str = "unresolvable dependency";

/// Result of one selection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The job at `index` was marked running and its weight reserved.
    /// `propagated` is set when the same pass also failed dependents.
    Run {
        index: usize,
        weight: u32,
        propagated: bool,
    },
    /// Nothing fits right now; wait for a running job to finish.
    Wait { changed: bool },
    /// Nothing will ever be selectable for this worker.
    Retire { changed: bool },
}

enum Readiness {
    Ready,
    Pending,
    Missing(String),
    Failed(Option<String>),
}

fn readiness(graph: &JobGraph, index: usize) -> Readiness {
    let Some(dep_id) = graph.get(index).and_then(|j| j.depends_on.as_deref()) else {
        return Readiness::Ready;
    };
    match graph.find_by_id(dep_id) {
        None => Readiness::Missing(dep_id.to_string()),
        Some(dep) => match dep.state {
            JobState::Completed => Readiness::Ready,
            JobState::Error => Readiness::Failed(dep.state_message.clone()),
            JobState::Waiting | JobState::Running => Readiness::Pending,
        },
    }
}

/// Run one selection pass.
///
/// `available` may be negative while an oversized job runs. `running` is the
/// number of jobs currently held by workers.
pub fn select_next(
    graph: &mut JobGraph,
    available: i64,
    running: u32,
    exiting: bool,
) -> Decision {
    if exiting || !graph.has_waiting() {
        return Decision::Retire { changed: false };
    }

    let ceiling = if running > 0 {
        available
    } else {
        i64::from(graph.max_weight())
    };

    let weights: BTreeSet<u32> = graph
        .list()
        .iter()
        .filter(|j| j.is_waiting() && i64::from(j.weight) <= ceiling)
        .map(|j| j.weight)
        .collect();

    let mut changed = false;
    for weight in weights {
        for index in 0..graph.len() {
            let eligible = graph
                .get(index)
                .map(|j| j.is_waiting() && j.weight == weight)
                .unwrap_or(false);
            if !eligible {
                continue;
            }

            let outcome = match readiness(graph, index) {
                Readiness::Pending => continue,
                Readiness::Ready => (JobState::Running, None),
                Readiness::Missing(dep_id) => {
                    (JobState::Error, Some(format!("dependency {} not found", dep_id)))
                }
                Readiness::Failed(message) => (JobState::Error, message),
            };

            let Some(job) = graph.job_mut(index) else {
                continue;
            };
            if job.transition(outcome.0, outcome.1).is_err() {
                continue;
            }
            graph.bump();

            if outcome.0 == JobState::Running {
                return Decision::Run {
                    index,
                    weight,
                    propagated: changed,
                };
            }
            tracing::debug!(index, "dependency failure propagated");
            changed = true;
        }
    }

    if changed || running > 0 {
        return Decision::Wait { changed };
    }

    // Nothing runs and nothing changed: every waiting job is blocked on a
    // cycle or on another blocked job.
    let mut stuck = 0;
    for index in 0..graph.len() {
        if let Some(job) = graph.job_mut(index) {
            if job.is_waiting()
                && job
                    .transition(JobState::Error, Some(UNRESOLVABLE_MESSAGE.to_string()))
                    .is_ok()
            {
                stuck += 1;
            }
        }
    }
    if stuck > 0 {
        graph.bump();
        tracing::warn!(jobs = stuck, "marked jobs with unresolvable dependencies as failed");
    }
    Decision::Retire {
        changed: stuck > 0,
    }
}
