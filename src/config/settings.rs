//! Typed view of the merged configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use slotq_exec::ProcessConfig;
use slotq_stage::StageConfig;

/// External command settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterSettings {
    /// Program run for every job; unset means the payload's first element
    #[serde(default)]
    pub program: Option<String>,

    /// Arguments placed before the payload
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub max_slots: u32,

    pub refresh_interval_secs: u64,

    /// Worker thread count; defaults to `max_slots`
    #[serde(default)]
    pub workers: Option<usize>,

    #[serde(default)]
    pub queue_file: Option<PathBuf>,

    pub termination_grace_seconds: u64,

    /// Empty disables the sentinel
    #[serde(default)]
    pub abort_sentinel: Option<String>,

    #[serde(default)]
    pub adapter: AdapterSettings,

    #[serde(default)]
    pub stages: StageConfig,
}

impl Settings {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or(self.max_slots as usize).max(1)
    }

    pub fn abort_sentinel(&self) -> Option<&str> {
        self.abort_sentinel.as_deref().filter(|s| !s.is_empty())
    }

    pub fn process_config(&self) -> ProcessConfig {
        ProcessConfig {
            program: self.adapter.program.clone(),
            args: self.adapter.args.clone(),
            termination_grace_seconds: self.termination_grace_seconds,
        }
    }
}
