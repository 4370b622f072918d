// src/engine/report.rs

//! Aggregate result of a DAG run.

use std::fmt;
use std::time::Duration;

use crate::dag::{UnitId, UnitState};

/// Final state of one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub unit: UnitId,
    pub task_id: String,
    pub state: UnitState,
}

/// A unit that did not succeed, with its reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub task_id: String,
    pub state: UnitState,
}

/// Job-level outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every unit succeeded.
    Completed,
    /// At least one unit failed, was blocked or timed out.
    CompletedWithFailures { failures: Vec<UnitFailure> },
}

/// Counts per terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub blocked: usize,
    pub timed_out: usize,
}

/// Structured result returned by `run_dag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagResult {
    pub job_id: String,
    /// Per-unit reports in resolved order.
    pub units: Vec<UnitReport>,
    pub outcome: JobOutcome,
    pub elapsed: Duration,
}

impl DagResult {
    pub(crate) fn new(job_id: String, units: Vec<UnitReport>, elapsed: Duration) -> Self {
        let failures: Vec<UnitFailure> = units
            .iter()
            .filter(|u| u.state != UnitState::Succeeded)
            .map(|u| UnitFailure {
                task_id: u.task_id.clone(),
                state: u.state.clone(),
            })
            .collect();

        let outcome = if failures.is_empty() {
            JobOutcome::Completed
        } else {
            JobOutcome::CompletedWithFailures { failures }
        };

        Self {
            job_id,
            units,
            outcome,
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == JobOutcome::Completed
    }

    /// Final state of the unit with the given task id.
    pub fn state_of(&self, task_id: &str) -> Option<&UnitState> {
        self.units
            .iter()
            .find(|u| u.task_id == task_id)
            .map(|u| &u.state)
    }

    pub fn failures(&self) -> &[UnitFailure] {
        match &self.outcome {
            JobOutcome::Completed => &[],
            JobOutcome::CompletedWithFailures { failures } => failures,
        }
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for unit in &self.units {
            match unit.state {
                UnitState::Succeeded => summary.succeeded += 1,
                UnitState::Failed(_) => summary.failed += 1,
                UnitState::Blocked { .. } => summary.blocked += 1,
                UnitState::TimedOut => summary.timed_out += 1,
                UnitState::Pending | UnitState::Submitted => {}
            }
        }
        summary
    }
}

impl fmt::Display for DagResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.summary();
        let status = if self.is_success() {
            "completed"
        } else {
            "completed with failures"
        };
        writeln!(
            f,
            "job '{}' {status} in {:.1}s: {} succeeded, {} failed, {} blocked, {} timed out",
            self.job_id,
            self.elapsed.as_secs_f64(),
            s.succeeded,
            s.failed,
            s.blocked,
            s.timed_out,
        )?;
        for unit in &self.units {
            writeln!(f, "  - {}: {}", unit.task_id, unit.state)?;
        }
        Ok(())
    }
}
