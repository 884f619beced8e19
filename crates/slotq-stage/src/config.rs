//! Stage classifier configuration types.

use serde::{Deserialize, Serialize};

use crate::result::StageError;
use crate::Stage;

/// Default marker token that requests a chained two-stage run.
pub const DEFAULT_CHAIN_MARKER: &str = "--two-pass";

/// Slot cost and extra arguments for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProfile {
    /// Slot cost of a job running this stage.
    pub weight: u32,

    /// Arguments appended to the payload for this stage.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl StageProfile {
    pub fn new(weight: u32, extra_args: &[&str]) -> Self {
        Self {
            weight,
            extra_args: extra_args.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Configuration for the stage classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Whole-argument token that marks a payload as two chained stages.
    #[serde(default = "default_chain_marker")]
    pub chain_marker: String,

    /// Profile for a payload that runs in one stage.
    #[serde(default = "default_single")]
    pub single: StageProfile,

    /// Profile for the first stage of a chain.
    #[serde(default = "default_first")]
    pub first: StageProfile,

    /// Profile for the second stage of a chain.
    #[serde(default = "default_second")]
    pub second: StageProfile,
}

fn default_chain_marker() -> String {
    DEFAULT_CHAIN_MARKER.to_string()
}

fn default_single() -> StageProfile {
    StageProfile::new(2, &[])
}

fn default_first() -> StageProfile {
    StageProfile::new(1, &["--1pass-only"])
}

fn default_second() -> StageProfile {
    StageProfile::new(2, &["--pass", "2", "--append-log"])
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            chain_marker: default_chain_marker(),
            single: default_single(),
            first: default_first(),
            second: default_second(),
        }
    }
}

impl StageConfig {
    /// Profile for a stage.
    pub fn profile(&self, stage: Stage) -> &StageProfile {
        match stage {
            Stage::Single => &self.single,
            Stage::First => &self.first,
            Stage::Second => &self.second,
        }
    }

    /// Reject zero weights and an empty chain marker.
    pub fn validate(&self) -> Result<(), StageError> {
        if self.chain_marker.trim().is_empty() {
            return Err(StageError::InvalidConfig(
                "chain_marker must not be empty".to_string(),
            ));
        }
        for stage in [Stage::Single, Stage::First, Stage::Second] {
            if self.profile(stage).weight == 0 {
                return Err(StageError::InvalidConfig(format!(
                    "stage '{}' must have a weight of at least 1",
                    stage
                )));
            }
        }
        Ok(())
    }
}
