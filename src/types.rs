// src/types.rs

use std::str::FromStr;

use clap::ValueEnum;
use serde::Deserialize;

/// When a unit is handed to the batch service relative to its predecessors.
///
/// - `Gated`: submit a unit only once every predecessor is terminal and
///   either succeeded or allows downstream work on failure (default). A unit
///   blocked by a failed parent is never submitted.
/// - `Eager`: submit every unit up front with remote dependency declarations
///   and let the service hold dependents back. Dependents of a failed parent
///   that does not allow downstream work are marked blocked locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionMode {
    Gated,
    Eager,
}

impl Default for SubmissionMode {
    fn default() -> Self {
        SubmissionMode::Gated
    }
}

impl FromStr for SubmissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gated" => Ok(SubmissionMode::Gated),
            "eager" => Ok(SubmissionMode::Eager),
            other => Err(format!(
                "invalid submission mode: {other} (expected \"gated\" or \"eager\")"
            )),
        }
    }
}
