// src/engine/driver.rs

//! Async submission and monitoring shell around [`RunTracker`].
//!
//! The tracker decides *what* happens to each unit; the driver performs the
//! IO: it ensures the job exists, submits units through the
//! [`BatchService`], sleeps between poll cycles and queries task states.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::dag::{JobPhase, ResolvedStep, Resolver, RunTracker, UnitId, UnitState, WorkGraph};
use crate::engine::report::{DagResult, UnitReport};
use crate::engine::RunOptions;
use crate::errors::{BatchDagError, Result};
use crate::exec::{BatchService, RemoteState, TaskSubmission};

/// Result of querying one task in one poll cycle.
enum PollOutcome {
    Known(RemoteState),
    /// Every attempt in this cycle failed with a non-fatal error.
    Unknown(String),
}

/// Submits a batch of work units and monitors it until completion.
///
/// Dropping the future returned by [`Driver::run_dag`] stops monitoring but
/// leaves already-submitted tasks running on the service.
#[derive(Debug)]
pub struct Driver<S: BatchService> {
    service: S,
    options: RunOptions,
}

impl<S: BatchService> Driver<S> {
    pub fn new(service: S, options: RunOptions) -> Self {
        Self { service, options }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run every unit of `graph` as one batch in job `job_id`.
    pub async fn run_dag(&self, graph: &WorkGraph, job_id: &str) -> Result<DagResult> {
        let members: Vec<UnitId> = graph.ids().collect();
        self.run_batch(graph, &members, job_id).await
    }

    /// Run the given members of `graph` as one batch in job `job_id`.
    ///
    /// Graph errors and a zero poll interval are returned before the service
    /// is contacted. After
    /// that, only job-level service errors abort the run; everything else
    /// ends up in the returned [`DagResult`].
    pub async fn run_batch(
        &self,
        graph: &WorkGraph,
        members: &[UnitId],
        job_id: &str,
    ) -> Result<DagResult> {
        let started = Instant::now();
        if self.options.poll_interval.is_zero() {
            return Err(BatchDagError::ConfigError(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        let steps = Resolver::new(graph).resolve(members)?;

        info!(
            job_id,
            units = steps.batch_len(),
            mode = ?self.options.mode,
            timeout = ?self.options.timeout,
            poll_interval = ?self.options.poll_interval,
            "starting DAG run"
        );

        self.ensure_job(job_id).await?;

        let mut tracker = RunTracker::new(steps, self.options.mode);
        let mut handles: HashMap<UnitId, S::Handle> = HashMap::new();
        // A timeout past the end of the clock means no deadline.
        let deadline = self
            .options
            .timeout
            .and_then(|t| started.checked_add(t));

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracker.time_out_remaining();
                break;
            }

            self.submit_ready(job_id, &mut tracker, &mut handles).await?;
            if tracker.is_settled() {
                break;
            }

            tracker.enter_phase(JobPhase::Monitoring);
            let nap = match deadline {
                Some(d) => self
                    .options
                    .poll_interval
                    .min(d.saturating_duration_since(Instant::now())),
                None => self.options.poll_interval,
            };
            sleep(nap).await;

            self.poll_submitted(job_id, &mut tracker, &handles).await?;
        }

        let phase = tracker.finish();
        let units: Vec<UnitReport> = tracker
            .into_states()
            .into_iter()
            .map(|(step, state)| UnitReport {
                unit: step.unit,
                task_id: step.task_id,
                state,
            })
            .collect();
        let any_timed_out = units.iter().any(|u| u.state == UnitState::TimedOut);

        let result = DagResult::new(job_id.to_string(), units, started.elapsed());
        let summary = result.summary();
        info!(
            job_id,
            phase = ?phase,
            succeeded = summary.succeeded,
            failed = summary.failed,
            blocked = summary.blocked,
            timed_out = summary.timed_out,
            elapsed = ?result.elapsed,
            "DAG run finished"
        );

        if self.options.delete_job_when_done {
            if any_timed_out {
                info!(job_id, "units still running remotely; job not deleted");
            } else {
                self.delete_job(job_id).await;
            }
        }

        Ok(result)
    }

    async fn ensure_job(&self, job_id: &str) -> Result<()> {
        match self.service.job_exists(job_id).await {
            Ok(true) => {
                info!(job_id, "job already exists; reusing it");
                return Ok(());
            }
            Ok(false) => {}
            Err(err) => {
                warn!(job_id, error = %err, "could not check whether job exists; trying to create it");
            }
        }

        self.service
            .ensure_job(job_id)
            .await
            .map_err(|source| BatchDagError::JobCreation {
                job_id: job_id.to_string(),
                source,
            })?;
        info!(job_id, "job ready");
        Ok(())
    }

    /// Submit every unit the tracker considers ready, one at a time, in
    /// resolved order.
    async fn submit_ready(
        &self,
        job_id: &str,
        tracker: &mut RunTracker,
        handles: &mut HashMap<UnitId, S::Handle>,
    ) -> Result<()> {
        while let Some(step) = tracker.next_ready() {
            let submission = submission_for(&step, handles);
            debug!(
                job_id,
                task = %step.task_id,
                dependencies = submission.dependencies.len(),
                run_dependents_on_failure = submission.run_dependents_on_failure,
                "submitting task"
            );

            match self.service.submit(job_id, submission).await {
                Ok(handle) => {
                    info!(job_id, task = %step.task_id, "task submitted");
                    handles.insert(step.unit, handle);
                    tracker.record_submitted(step.unit);
                }
                Err(source) if source.is_job_fatal() => {
                    error!(
                        job_id,
                        task = %step.task_id,
                        error = %source,
                        "job unusable; aborting run"
                    );
                    return Err(BatchDagError::Submission {
                        unit_id: step.task_id,
                        source,
                    });
                }
                Err(source) => {
                    tracker.record_rejected(step.unit, source.to_string());
                }
            }
        }
        Ok(())
    }

    /// Query every submitted unit once and feed the results to the tracker.
    async fn poll_submitted(
        &self,
        job_id: &str,
        tracker: &mut RunTracker,
        handles: &HashMap<UnitId, S::Handle>,
    ) -> Result<()> {
        for (unit, task_id) in tracker.awaiting_poll() {
            let Some(handle) = handles.get(&unit) else {
                warn!(job_id, task = %task_id, "submitted unit has no handle; skipping poll");
                continue;
            };

            match self.query_with_retry(job_id, &task_id, handle).await? {
                PollOutcome::Known(state) => {
                    tracker.apply_remote_state(unit, state);
                }
                PollOutcome::Unknown(cause) => {
                    tracker.record_unknown_state(unit, cause, self.options.max_unknown_polls);
                }
            }
        }

        tracker.block_unreachable();

        let (terminal, total) = tracker.progress();
        debug!(
            job_id,
            completed = terminal,
            remaining = total - terminal,
            "poll cycle finished"
        );
        Ok(())
    }

    async fn query_with_retry(
        &self,
        job_id: &str,
        task_id: &str,
        handle: &S::Handle,
    ) -> Result<PollOutcome> {
        let attempts = self.options.query_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.service.query_state(job_id, handle).await {
                Ok(state) => return Ok(PollOutcome::Known(state)),
                Err(source) if source.is_job_fatal() => {
                    error!(job_id, task = %task_id, error = %source, "job unusable while monitoring");
                    return Err(BatchDagError::Query {
                        unit_id: task_id.to_string(),
                        source,
                    });
                }
                Err(err) => {
                    debug!(job_id, task = %task_id, attempt, error = %err, "state query failed");
                    last_error = err.to_string();
                    if attempt < attempts {
                        sleep(self.options.query_retry_delay).await;
                    }
                }
            }
        }

        Ok(PollOutcome::Unknown(last_error))
    }

    async fn delete_job(&self, job_id: &str) {
        match self.service.delete_job(job_id).await {
            Ok(()) => info!(job_id, "job deleted"),
            Err(err) => warn!(job_id, error = %err, "failed to delete job"),
        }
    }
}

fn submission_for<H: Clone>(step: &ResolvedStep, handles: &HashMap<UnitId, H>) -> TaskSubmission<H> {
    TaskSubmission {
        task_id: step.task_id.clone(),
        command: step.command.clone(),
        dependencies: step.dependency_handles(handles),
        run_dependents_on_failure: step.allow_downstream_on_failure,
    }
}

/// Convenience wrapper: run every unit of `graph` with default options,
/// overriding the timeout and poll interval.
pub async fn run_dag<S: BatchService>(
    service: S,
    graph: &WorkGraph,
    job_id: &str,
    timeout: Option<Duration>,
    poll_interval: Option<Duration>,
) -> Result<DagResult> {
    let mut options = RunOptions::default();
    options.timeout = timeout;
    if let Some(interval) = poll_interval {
        options.poll_interval = interval;
    }
    Driver::new(service, options).run_dag(graph, job_id).await
}
