// src/engine/mod.rs

//! Submission and monitoring engine.
//!
//! The pure per-run state machine lives in [`crate::dag::tracker`]; the
//! async/IO shell that talks to a [`crate::exec::BatchService`] is
//! implemented in [`driver`]. [`report`] holds the structured result.

use std::time::Duration;

use crate::types::SubmissionMode;

/// Options controlling one DAG run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Stop monitoring after this long. Units not yet terminal are reported
    /// as timed out.
    pub timeout: Option<Duration>,
    /// Sleep between poll cycles.
    pub poll_interval: Duration,
    pub mode: SubmissionMode,
    /// Extra query attempts per unit per poll cycle after a transient error.
    pub query_retries: u32,
    pub query_retry_delay: Duration,
    /// Consecutive poll cycles with an unknown state before a unit is
    /// considered failed.
    pub max_unknown_polls: u32,
    /// Delete the job once every unit is terminal.
    pub delete_job_when_done: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            poll_interval: Duration::from_secs(5),
            mode: SubmissionMode::default(),
            query_retries: 2,
            query_retry_delay: Duration::from_millis(500),
            max_unknown_polls: 3,
            delete_job_when_done: false,
        }
    }
}

pub mod driver;
pub mod report;

pub use driver::{Driver, run_dag};
pub use report::{DagResult, JobOutcome, RunSummary, UnitFailure, UnitReport};
