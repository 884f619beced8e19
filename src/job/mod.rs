//! Job entity and state machine
//!
//! Job states: WAITING → RUNNING → {COMPLETED | ERROR}, plus WAITING → ERROR
//! when a dependency fails or cannot be resolved. Only an explicit reset
//! returns a job to WAITING.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use slotq_stage::{PlannedJob, Stage, StagePlan};
use thiserror::Error;

/// Job state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Eligible for selection once its dependency completes
    Waiting,
    /// Held by exactly one worker
    Running,
    /// Finished successfully
    Completed,
    /// Failed, or blocked by a failed or missing dependency
    Error,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Error => "error",
        }
    }

    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: JobState) -> bool {
        matches!(
            (self, target),
            (JobState::Waiting, JobState::Running)
                | (JobState::Waiting, JobState::Error)
                | (JobState::Running, JobState::Completed)
                | (JobState::Running, JobState::Error)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors for job operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("invalid state transition for job {id} from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: JobState,
        to: JobState,
    },
}

/// One queued external process invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Stable identifier (lowercase ULID)
    pub id: String,

    /// Arguments handed to the execution adapter verbatim
    pub payload: Vec<String>,

    /// Slot cost while running
    pub weight: u32,

    /// Job that must complete before this one may start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,

    pub state: JobState,

    /// Diagnostic on error, summary on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_message: Option<String>,

    /// Directory the process runs in
    pub working_dir: PathBuf,

    /// Stage recorded at creation, for display
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a waiting job with a fresh id.
    pub fn new(payload: Vec<String>, weight: u32, working_dir: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_job_id(),
            payload,
            weight,
            depends_on: None,
            state: JobState::Waiting,
            state_message: None,
            working_dir: working_dir.into(),
            stage: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on = Some(id.into());
        self
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn is_waiting(&self) -> bool {
        self.state == JobState::Waiting
    }

    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }

    /// Move to `target`, replacing the state message.
    pub fn transition(
        &mut self,
        target: JobState,
        message: Option<String>,
    ) -> Result<(), JobError> {
        if !self.state.can_transition_to(target) {
            return Err(JobError::InvalidTransition {
                id: self.id.clone(),
                from: self.state,
                to: target,
            });
        }
        self.state = target;
        self.state_message = message;
        self.touch();
        Ok(())
    }

    /// Force back to waiting and clear the message.
    pub fn reset(&mut self) {
        self.state = JobState::Waiting;
        self.state_message = None;
        self.touch();
    }

    /// Replace the message without changing state.
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.state_message = Some(message.into());
        self.touch();
    }

    /// Payload rendered for display, quoting arguments that need it.
    pub fn command_line(&self) -> String {
        self.payload
            .iter()
            .map(|arg| quote_arg(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Generate a new job id using ULID (sortable, filesystem-safe)
pub fn generate_job_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}

/// Quote an argument that is empty or contains whitespace.
pub fn quote_arg(arg: &str) -> Cow<'_, str> {
    if arg.is_empty() || arg.chars().any(char::is_whitespace) {
        Cow::Owned(format!("\"{}\"", arg))
    } else {
        Cow::Borrowed(arg)
    }
}

/// Build the jobs for a stage plan. A chained plan yields the first stage
/// followed by the second, which depends on it.
pub fn jobs_for_plan(plan: &StagePlan, working_dir: &Path) -> Vec<Job> {
    let build = |planned: &PlannedJob| {
        Job::new(planned.payload.clone(), planned.weight, working_dir).with_stage(planned.stage)
    };

    match plan {
        StagePlan::Single(planned) => vec![build(planned)],
        StagePlan::Chained { first, second } => {
            let first = build(first);
            let second = build(second).with_dependency(first.id.clone());
            vec![first, second]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotq_stage::{classify, StageConfig};

    fn argv(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_generate_job_id_valid() {
        let id = generate_job_id();
        assert_eq!(id.len(), 26);
        assert_eq!(id, id.to_lowercase());
        assert_ne!(id, generate_job_id());
    }

    #[test]
    fn test_new_job_is_waiting() {
        let job = Job::new(argv("enc a.avs"), 2, "/tmp");
        assert!(job.is_waiting());
        assert!(job.depends_on.is_none());
        assert!(job.state_message.is_none());
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn test_valid_transitions() {
        assert!(JobState::Waiting.can_transition_to(JobState::Running));
        assert!(JobState::Waiting.can_transition_to(JobState::Error));
        assert!(JobState::Running.can_transition_to(JobState::Completed));
        assert!(JobState::Running.can_transition_to(JobState::Error));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!JobState::Waiting.can_transition_to(JobState::Completed));
        assert!(!JobState::Completed.can_transition_to(JobState::Running));
        assert!(!JobState::Error.can_transition_to(JobState::Waiting));
        assert!(!JobState::Running.can_transition_to(JobState::Waiting));
    }

    #[test]
    fn test_transition_records_message() {
        let mut job = Job::new(argv("enc"), 1, "/tmp");
        job.transition(JobState::Running, None).unwrap();
        job.transition(JobState::Error, Some("exit code 1: boom".into()))
            .unwrap();
        assert_eq!(job.state, JobState::Error);
        assert_eq!(job.state_message.as_deref(), Some("exit code 1: boom"));

        let err = job.transition(JobState::Running, None).unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
    }

    #[test]
    fn test_reset_clears_message() {
        let mut job = Job::new(argv("enc"), 1, "/tmp");
        job.transition(JobState::Error, Some("dependency x not found".into()))
            .unwrap();
        job.reset();
        assert!(job.is_waiting());
        assert!(job.state_message.is_none());
    }

    #[test]
    fn test_command_line_quotes() {
        let job = Job::new(
            vec!["enc".into(), "My Movie.avs".into(), "".into(), "--crf".into()],
            1,
            "/tmp",
        );
        assert_eq!(job.command_line(), "enc \"My Movie.avs\" \"\" --crf");
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&JobState::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }

    #[test]
    fn test_jobs_for_chained_plan() {
        let plan = classify(
            &argv("enc in.avs --two-pass"),
            None,
            &StageConfig::default(),
        )
        .unwrap();
        let jobs = jobs_for_plan(&plan, Path::new("/work"));

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].stage, Some(Stage::First));
        assert_eq!(jobs[0].weight, 1);
        assert!(jobs[0].depends_on.is_none());
        assert_eq!(jobs[1].stage, Some(Stage::Second));
        assert_eq!(jobs[1].weight, 2);
        assert_eq!(jobs[1].depends_on.as_deref(), Some(jobs[0].id.as_str()));
        assert_eq!(jobs[1].working_dir, PathBuf::from("/work"));
    }

    #[test]
    fn test_jobs_for_single_plan() {
        let plan = classify(&argv("enc in.avs"), None, &StageConfig::default()).unwrap();
        let jobs = jobs_for_plan(&plan, Path::new("/work"));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].weight, 2);
        assert_eq!(jobs[0].payload, argv("enc in.avs"));
    }
}
