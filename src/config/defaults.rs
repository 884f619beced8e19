//! Built-in defaults (layer 1)

use serde::{Deserialize, Serialize};
use slotq_stage::StageConfig;

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Slot budget shared by running jobs (default: 2)
    pub max_slots: u32,

    /// Seconds between status redraws (default: 1)
    pub refresh_interval_secs: u64,

    /// Seconds a process gets between SIGTERM and SIGKILL (default: 10)
    pub termination_grace_seconds: u64,

    /// Output prefix that aborts the whole run (default: "aborted at input")
    pub abort_sentinel: String,

    /// Stage costs and extra arguments
    pub stages: StageConfig,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            max_slots: 2,
            refresh_interval_secs: 1,
            termination_grace_seconds: 10,
            abort_sentinel: "aborted at input".to_string(),
            stages: StageConfig::default(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "max_slots": self.max_slots,
            "refresh_interval_secs": self.refresh_interval_secs,
            "termination_grace_seconds": self.termination_grace_seconds,
            "abort_sentinel": self.abort_sentinel,
            "adapter": {
                "args": []
            },
            "stages": {
                "chain_marker": self.stages.chain_marker,
                "single": {
                    "weight": self.stages.single.weight,
                    "extra_args": self.stages.single.extra_args,
                },
                "first": {
                    "weight": self.stages.first.weight,
                    "extra_args": self.stages.first.extra_args,
                },
                "second": {
                    "weight": self.stages.second.weight,
                    "extra_args": self.stages.second.extra_args,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let defaults = BuiltinDefaults::default();
        assert_eq!(defaults.max_slots, 2);
        assert_eq!(defaults.refresh_interval_secs, 1);
        assert_eq!(defaults.termination_grace_seconds, 10);
        assert_eq!(defaults.abort_sentinel, "aborted at input");
    }

    #[test]
    fn test_to_value() {
        let value = BuiltinDefaults::default().to_value();

        assert_eq!(value["max_slots"], 2);
        assert_eq!(value["stages"]["chain_marker"], "--two-pass");
        assert_eq!(value["stages"]["first"]["weight"], 1);
        assert_eq!(value["stages"]["second"]["extra_args"][0], "--pass");
        assert!(value.get("workers").is_none());
    }
}
