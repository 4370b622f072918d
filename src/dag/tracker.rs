// src/dag/tracker.rs

//! Pure per-run state machine.
//!
//! The tracker owns the resolved order and the local state of every unit. It
//! decides which unit may be submitted next, which units are blocked by a
//! failed predecessor, and when the run is settled. It performs no IO; the
//! async driver in [`crate::engine::driver`] feeds it submission and polling
//! results.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::dag::resolver::{ResolvedStep, ResolvedSteps};
use crate::dag::state::{FailureReason, JobPhase, UnitState};
use crate::dag::unit::UnitId;
use crate::exec::RemoteState;
use crate::types::SubmissionMode;

#[derive(Debug, Clone)]
struct TrackedUnit {
    step: ResolvedStep,
    state: UnitState,
    /// Consecutive poll cycles in which the state could not be queried.
    unknown_polls: u32,
}

enum Readiness {
    Ready,
    Wait,
    Blocked { upstream: String },
}

/// Local state of one run, in resolved order.
#[derive(Debug, Clone)]
pub struct RunTracker {
    mode: SubmissionMode,
    units: Vec<TrackedUnit>,
    index: HashMap<UnitId, usize>,
    phase: JobPhase,
    /// Every unit before this position has left `Pending`.
    first_pending: usize,
    /// A unit turned terminal without succeeding since the last blocking pass.
    blocking_stale: bool,
}

impl RunTracker {
    /// Drain the resolved sequence into a fresh tracker. Every unit starts
    /// `Pending`.
    pub fn new(steps: ResolvedSteps, mode: SubmissionMode) -> Self {
        let units: Vec<TrackedUnit> = steps
            .map(|step| TrackedUnit {
                step,
                state: UnitState::Pending,
                unknown_polls: 0,
            })
            .collect();
        let index = units
            .iter()
            .enumerate()
            .map(|(pos, u)| (u.step.unit, pos))
            .collect();

        Self {
            mode,
            units,
            index,
            phase: JobPhase::Building,
            first_pending: 0,
            blocking_stale: false,
        }
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    pub fn mode(&self) -> SubmissionMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn state_of(&self, unit: UnitId) -> Option<&UnitState> {
        self.index.get(&unit).map(|&pos| &self.units[pos].state)
    }

    pub fn state_of_task(&self, task_id: &str) -> Option<&UnitState> {
        self.units
            .iter()
            .find(|u| u.step.task_id == task_id)
            .map(|u| &u.state)
    }

    /// Move the job phase forward. Phases never go backwards.
    pub fn enter_phase(&mut self, phase: JobPhase) {
        if phase_rank(phase) > phase_rank(self.phase) {
            debug!(from = ?self.phase, to = ?phase, "job phase transition");
            self.phase = phase;
        }
    }

    /// Next unit that may be submitted, in resolved order.
    ///
    /// Blocked units are marked first. The returned unit stays `Pending`
    /// until the caller reports the outcome through
    /// [`RunTracker::record_submitted`] or [`RunTracker::record_rejected`].
    pub fn next_ready(&mut self) -> Option<ResolvedStep> {
        if self.blocking_stale {
            self.block_unreachable();
        }
        while self
            .units
            .get(self.first_pending)
            .is_some_and(|u| u.state != UnitState::Pending)
        {
            self.first_pending += 1;
        }

        let pos = (self.first_pending..self.units.len()).find(|&pos| {
            self.units[pos].state == UnitState::Pending
                && matches!(self.readiness(pos), Readiness::Ready)
        })?;

        self.enter_phase(JobPhase::Submitting);
        Some(self.units[pos].step.clone())
    }

    pub fn record_submitted(&mut self, unit: UnitId) {
        if let Some(tracked) = self.tracked_mut(unit) {
            debug!(task = %tracked.step.task_id, "unit submitted");
            tracked.state = UnitState::Submitted;
        }
    }

    /// A per-unit submission error: the unit fails without a handle.
    pub fn record_rejected(&mut self, unit: UnitId, cause: impl Into<String>) {
        if let Some(tracked) = self.tracked_mut(unit) {
            let cause = cause.into();
            warn!(task = %tracked.step.task_id, %cause, "submission rejected; marking unit failed");
            tracked.state = UnitState::Failed(FailureReason::SubmissionRejected(cause));
            self.blocking_stale = true;
        }
    }

    /// Units currently awaiting a terminal state on the service, as
    /// `(unit, task_id)` pairs in resolved order.
    pub fn awaiting_poll(&self) -> Vec<(UnitId, String)> {
        self.units
            .iter()
            .filter(|u| u.state == UnitState::Submitted)
            .map(|u| (u.step.unit, u.step.task_id.clone()))
            .collect()
    }

    /// Apply a successfully queried remote state.
    ///
    /// Returns `true` if the unit reached a terminal state with this update.
    pub fn apply_remote_state(&mut self, unit: UnitId, remote: RemoteState) -> bool {
        let Some(tracked) = self.tracked_mut(unit) else {
            warn!(unit = %unit, "remote state for unit outside this run; ignoring");
            return false;
        };
        if tracked.state != UnitState::Submitted {
            return false;
        }
        tracked.unknown_polls = 0;

        match remote {
            RemoteState::Pending | RemoteState::Running => false,
            RemoteState::Succeeded => {
                info!(task = %tracked.step.task_id, "task succeeded");
                tracked.state = UnitState::Succeeded;
                true
            }
            RemoteState::Failed { exit_code } => {
                warn!(task = %tracked.step.task_id, ?exit_code, "task failed");
                tracked.state = UnitState::Failed(FailureReason::Execution { exit_code });
                self.blocking_stale = true;
                true
            }
        }
    }

    /// Record a poll cycle in which the state of `unit` could not be read.
    ///
    /// After `max_unknown_polls` consecutive unknown cycles the unit is marked
    /// `Failed(StateUnknown)`. Returns `true` if that happened now.
    pub fn record_unknown_state(
        &mut self,
        unit: UnitId,
        cause: impl Into<String>,
        max_unknown_polls: u32,
    ) -> bool {
        let Some(tracked) = self.tracked_mut(unit) else {
            return false;
        };
        if tracked.state != UnitState::Submitted {
            return false;
        }

        tracked.unknown_polls += 1;
        let cause = cause.into();
        if tracked.unknown_polls >= max_unknown_polls {
            warn!(
                task = %tracked.step.task_id,
                polls = tracked.unknown_polls,
                %cause,
                "state unknown for too many poll cycles; marking unit failed"
            );
            tracked.state = UnitState::Failed(FailureReason::StateUnknown(cause));
            self.blocking_stale = true;
            true
        } else {
            debug!(
                task = %tracked.step.task_id,
                polls = tracked.unknown_polls,
                %cause,
                "state unknown for this poll cycle"
            );
            false
        }
    }

    /// Mark every non-terminal unit with a blocking failed predecessor as
    /// `Blocked`. A single pass in resolved order handles transitive
    /// blocking.
    ///
    /// Returns the task ids newly marked blocked.
    pub fn block_unreachable(&mut self) -> Vec<String> {
        let mut newly_blocked = Vec::new();

        for pos in 0..self.units.len() {
            if self.units[pos].state.is_terminal() {
                continue;
            }
            if let Readiness::Blocked { upstream } = self.readiness(pos) {
                let tracked = &mut self.units[pos];
                info!(
                    task = %tracked.step.task_id,
                    upstream = %upstream,
                    was_submitted = tracked.state == UnitState::Submitted,
                    "upstream failed; marking unit blocked"
                );
                tracked.state = UnitState::Blocked { upstream };
                newly_blocked.push(tracked.step.task_id.clone());
            }
        }

        self.blocking_stale = false;
        newly_blocked
    }

    /// `(terminal, total)` unit counts.
    pub fn progress(&self) -> (usize, usize) {
        let terminal = self.units.iter().filter(|u| u.state.is_terminal()).count();
        (terminal, self.units.len())
    }

    /// Whether every unit reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.units.iter().all(|u| u.state.is_terminal())
    }

    /// Mark every non-terminal unit `TimedOut`. Returns their task ids.
    pub fn time_out_remaining(&mut self) -> Vec<String> {
        let mut timed_out = Vec::new();
        for tracked in self.units.iter_mut().filter(|u| !u.state.is_terminal()) {
            tracked.state = UnitState::TimedOut;
            timed_out.push(tracked.step.task_id.clone());
        }
        if !timed_out.is_empty() {
            warn!(?timed_out, "monitoring timeout elapsed; units left as they are remotely");
        }
        timed_out
    }

    /// Close the run: the final phase depends on whether every unit
    /// succeeded.
    pub fn finish(&mut self) -> JobPhase {
        let phase = if self.units.iter().all(|u| u.state == UnitState::Succeeded) {
            JobPhase::Completed
        } else {
            JobPhase::CompletedWithFailures
        };
        self.enter_phase(phase);
        self.phase
    }

    /// Final `(step, state)` pairs in resolved order.
    pub fn into_states(self) -> Vec<(ResolvedStep, UnitState)> {
        self.units.into_iter().map(|u| (u.step, u.state)).collect()
    }

    fn tracked_mut(&mut self, unit: UnitId) -> Option<&mut TrackedUnit> {
        let pos = *self.index.get(&unit)?;
        self.units.get_mut(pos)
    }

    fn readiness(&self, pos: usize) -> Readiness {
        let mut wait = false;

        for pred in &self.units[pos].step.predecessors {
            let Some(&pred_pos) = self.index.get(pred) else {
                continue;
            };
            let upstream = &self.units[pred_pos];

            match &upstream.state {
                UnitState::Succeeded => {}
                UnitState::Submitted => {
                    if self.mode == SubmissionMode::Gated {
                        wait = true;
                    }
                }
                UnitState::Pending => wait = true,
                UnitState::Failed(_) | UnitState::Blocked { .. } | UnitState::TimedOut => {
                    if !upstream.step.allow_downstream_on_failure {
                        return Readiness::Blocked {
                            upstream: upstream.step.task_id.clone(),
                        };
                    }
                }
            }
        }

        if wait { Readiness::Wait } else { Readiness::Ready }
    }
}

fn phase_rank(phase: JobPhase) -> u8 {
    match phase {
        JobPhase::Building => 0,
        JobPhase::Submitting => 1,
        JobPhase::Monitoring => 2,
        JobPhase::Completed | JobPhase::CompletedWithFailures => 3,
    }
}
