//! slotq - local slot-weighted job queue
//!
//! Jobs wrap one external process run each. A fixed worker pool runs as many
//! as fit in a slot budget, lighter jobs first, while honoring one-job
//! dependencies between chained stages. The queue is persisted after every
//! change so an interrupted run resumes where it stopped.

pub mod config;
pub mod graph;
pub mod job;
pub mod run;
pub mod scheduler;
pub mod signal;
pub mod status;
pub mod store;

pub use config::{ConfigError, EffectiveConfig, Settings};
pub use graph::{GraphError, JobGraph};
pub use job::{jobs_for_plan, Job, JobState};
pub use run::{run_queue, RunError, RunOptions, RunOutcome};
pub use scheduler::{Assignment, JobResult, Scheduler};
pub use signal::{ShutdownReason, ShutdownToken, SignalHandler};
pub use status::{PlainReporter, StatusBoard, StatusReporter, StatusView};
pub use store::{QueueSnapshot, QueueStore, SaveOutcome, StoreError};
