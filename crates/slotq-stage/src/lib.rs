//! Stage classifier for queued payloads.
//!
//! Decides whether an `add` becomes one job or a chained pair, and which
//! slot cost each job carries. Chaining is requested explicitly with a marker
//! argument (default `--two-pass`); a single stage can be named directly.

mod config;
mod parser;
mod result;

pub use config::{StageConfig, StageProfile, DEFAULT_CHAIN_MARKER};
pub use parser::{scan_payload, with_stage_args, ScannedPayload, PASSTHROUGH_SEPARATOR};
pub use result::{PlannedJob, StageError, StagePlan};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A named stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Single,
    First,
    Second,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Single => "single",
            Stage::First => "first",
            Stage::Second => "second",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = StageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(Stage::Single),
            "first" | "pass1" => Ok(Stage::First),
            "second" | "pass2" => Ok(Stage::Second),
            _ => Err(StageError::UnknownStage(s.to_string())),
        }
    }
}

/// Classify a payload into a stage plan.
///
/// `explicit` is the stage named on the command line, if any. Naming a stage
/// together with the chain marker is rejected.
pub fn classify(
    payload: &[String],
    explicit: Option<Stage>,
    config: &StageConfig,
) -> Result<StagePlan, StageError> {
    config.validate()?;

    let scanned = scan_payload(payload, &config.chain_marker);
    if scanned.args.is_empty() {
        return Err(StageError::EmptyPayload);
    }

    let plan_for = |stage: Stage| {
        let profile = config.profile(stage);
        PlannedJob {
            stage,
            payload: with_stage_args(&scanned.args, &profile.extra_args),
            weight: profile.weight,
        }
    };

    match (explicit, scanned.chained) {
        (Some(stage), true) => Err(StageError::ConflictingStage(stage)),
        (Some(stage), false) => Ok(StagePlan::Single(plan_for(stage))),
        (None, true) => Ok(StagePlan::Chained {
            first: plan_for(Stage::First),
            second: plan_for(Stage::Second),
        }),
        (None, false) => Ok(StagePlan::Single(plan_for(Stage::Single))),
    }
}
