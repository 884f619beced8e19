//! Classification result types.

use crate::Stage;

/// One job the front-end should enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedJob {
    /// Stage this job runs.
    pub stage: Stage,

    /// Payload handed to the execution adapter.
    pub payload: Vec<String>,

    /// Slot cost.
    pub weight: u32,
}

/// What an `add` turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagePlan {
    /// A single job.
    Single(PlannedJob),

    /// Two jobs; `second` must not start before `first` completes.
    Chained { first: PlannedJob, second: PlannedJob },
}

impl StagePlan {
    /// Planned jobs in enqueue order.
    pub fn jobs(&self) -> Vec<&PlannedJob> {
        match self {
            StagePlan::Single(job) => vec![job],
            StagePlan::Chained { first, second } => vec![first, second],
        }
    }

    pub fn is_chained(&self) -> bool {
        matches!(self, StagePlan::Chained { .. })
    }
}

/// Errors from classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    #[error("payload is empty")]
    EmptyPayload,

    #[error("unknown stage '{0}' (expected single, first or second)")]
    UnknownStage(String),

    #[error("payload requests a chained run but stage '{0}' was named explicitly")]
    ConflictingStage(Stage),

    #[error("invalid stage configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planned(stage: Stage, weight: u32) -> PlannedJob {
        PlannedJob {
            stage,
            payload: vec!["x".to_string()],
            weight,
        }
    }

    #[test]
    fn test_jobs_order() {
        let plan = StagePlan::Chained {
            first: planned(Stage::First, 1),
            second: planned(Stage::Second, 2),
        };
        let jobs = plan.jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].stage, Stage::First);
        assert_eq!(jobs[1].stage, Stage::Second);
        assert!(plan.is_chained());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            StageError::UnknownStage("third".to_string()).to_string(),
            "unknown stage 'third' (expected single, first or second)"
        );
        assert!(StageError::ConflictingStage(Stage::First)
            .to_string()
            .contains("'first'"));
    }
}
