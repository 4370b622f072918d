// src/dag/state.rs

//! Per-unit and per-job states tracked during a run.

use std::fmt;

/// Why a unit ended up `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The task ran on the service and failed.
    Execution { exit_code: Option<i32> },
    /// The service refused the submission.
    SubmissionRejected(String),
    /// The task state could not be queried for too many poll cycles.
    StateUnknown(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Execution {
                exit_code: Some(code),
            } => write!(f, "execution failed (exit code {code})"),
            FailureReason::Execution { exit_code: None } => write!(f, "execution failed"),
            FailureReason::SubmissionRejected(cause) => write!(f, "submission rejected: {cause}"),
            FailureReason::StateUnknown(cause) => write!(f, "state unknown: {cause}"),
        }
    }
}

/// Local view of a unit's lifecycle.
///
/// `Pending -> Submitted -> {Succeeded, Failed}`, with `Blocked` and
/// `TimedOut` as additional terminal exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitState {
    /// Not submitted yet.
    Pending,
    /// Submitted and not yet observed in a terminal state.
    Submitted,
    Succeeded,
    Failed(FailureReason),
    /// Skipped because `upstream` failed and does not allow downstream work
    /// to run on failure.
    Blocked { upstream: String },
    /// Still pending or running when the monitoring timeout elapsed.
    TimedOut,
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UnitState::Pending | UnitState::Submitted)
    }

    /// Terminal and not `Succeeded`.
    pub fn is_failure(&self) -> bool {
        self.is_terminal() && !matches!(self, UnitState::Succeeded)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitState::Pending => write!(f, "pending"),
            UnitState::Submitted => write!(f, "submitted"),
            UnitState::Succeeded => write!(f, "succeeded"),
            UnitState::Failed(reason) => write!(f, "failed: {reason}"),
            UnitState::Blocked { upstream } => write!(f, "blocked by '{upstream}'"),
            UnitState::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Job-level phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Building,
    Submitting,
    Monitoring,
    Completed,
    CompletedWithFailures,
}
