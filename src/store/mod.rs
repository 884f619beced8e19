//! Persistent queue store
//!
//! The queue lives in one JSON document (`slotq/queue@1`). Every save writes
//! a temp file in the same directory and renames it over the target, so a
//! reader never observes a partial write. An empty queue deletes the file.
//!
//! Loading never fails the caller: a missing file is an empty queue, and an
//! unreadable or invalid one is logged and treated as empty.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{GraphError, JobGraph};
use crate::job::Job;

/// Schema version for the queue file
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier for the queue file
pub const SCHEMA_ID: &str = "slotq/queue@1";

/// Environment variable overriding the queue file location
pub const QUEUE_FILE_ENV: &str = "SLOTQ_QUEUE_FILE";

/// File name used under the temp directory when nothing else is configured
pub const DEFAULT_QUEUE_FILE_NAME: &str = ".slotq_queue.json";

/// Errors for queue store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported queue file schema {found} (expected {expected})")]
    SchemaMismatch { expected: String, found: String },

    #[error("invalid queue contents: {0}")]
    InvalidGraph(#[from] GraphError),
}

/// Serialized image of the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub schema_version: u32,
    pub schema_id: String,
    /// Graph generation this snapshot was taken at
    pub generation: u64,
    pub saved_at: DateTime<Utc>,
    pub jobs: Vec<Job>,
}

impl QueueSnapshot {
    /// Copy the current graph contents.
    pub fn capture(graph: &JobGraph) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            generation: graph.generation(),
            saved_at: Utc::now(),
            jobs: graph.list().to_vec(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Validate the schema and rebuild the graph.
    pub fn into_graph(self) -> Result<JobGraph, StoreError> {
        if self.schema_id != SCHEMA_ID || self.schema_version != SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                expected: SCHEMA_ID.to_string(),
                found: format!("{} v{}", self.schema_id, self.schema_version),
            });
        }
        Ok(JobGraph::from_jobs(self.jobs, self.generation)?)
    }
}

/// What a save did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    /// The queue was empty, so the file was removed
    Deleted,
    /// A newer generation had already been saved
    Skipped,
}

/// Queue file handle. Saves are serialized by an internal lock that is
/// independent of the scheduler lock.
#[derive(Debug)]
pub struct QueueStore {
    path: PathBuf,
    last_saved: Mutex<Option<u64>>,
}

impl QueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_saved: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue file location: `$SLOTQ_QUEUE_FILE`, then the configured path,
    /// then `<temp dir>/.slotq_queue.json`.
    pub fn resolve_path(configured: Option<&Path>) -> PathBuf {
        resolve_path_with(std::env::var_os(QUEUE_FILE_ENV), configured)
    }

    /// Load the queue, falling back to an empty one.
    pub fn load(&self) -> JobGraph {
        match self.try_load() {
            Ok(Some(graph)) => {
                tracing::debug!(path = %self.path.display(), jobs = graph.len(), "loaded queue");
                graph
            }
            Ok(None) => JobGraph::new(),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "queue file is unreadable, starting with an empty queue"
                );
                JobGraph::new()
            }
        }
    }

    /// Load the queue. `Ok(None)` means the file does not exist.
    pub fn try_load(&self) -> Result<Option<JobGraph>, StoreError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot = QueueSnapshot::from_json(&json)?;
        Ok(Some(snapshot.into_graph()?))
    }

    /// Persist a snapshot. Snapshots older than the last one saved through
    /// this handle are skipped.
    pub fn save(&self, snapshot: &QueueSnapshot) -> Result<SaveOutcome, StoreError> {
        let mut last_saved = self.last_saved.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(last) = *last_saved {
            if snapshot.generation < last {
                tracing::debug!(
                    generation = snapshot.generation,
                    last,
                    "skipping stale queue snapshot"
                );
                return Ok(SaveOutcome::Skipped);
            }
        }

        let outcome = if snapshot.jobs.is_empty() {
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            SaveOutcome::Deleted
        } else {
            self.write_atomic(&snapshot.to_json()?)?;
            SaveOutcome::Written
        };

        *last_saved = Some(snapshot.generation);
        Ok(outcome)
    }

    /// Capture and save in one step.
    pub fn save_graph(&self, graph: &JobGraph) -> Result<SaveOutcome, StoreError> {
        self.save(&QueueSnapshot::capture(graph))
    }

    fn write_atomic(&self, json: &str) -> io::Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let temp_path = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        if let Err(e) = fs::write(&temp_path, json).and_then(|_| fs::rename(&temp_path, &self.path))
        {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        Ok(())
    }
}

fn resolve_path_with(env: Option<OsString>, configured: Option<&Path>) -> PathBuf {
    if let Some(path) = env.filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    if let Some(path) = configured {
        return path.to_path_buf();
    }
    std::env::temp_dir().join(DEFAULT_QUEUE_FILE_NAME)
}
