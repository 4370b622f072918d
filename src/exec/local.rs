// src/exec/local.rs

//! Batch service that runs tasks as local shell processes.
//!
//! Each job is an in-memory table of tasks. A submitted task waits for its
//! upstream tasks to finish, then either runs its command or, if a required
//! upstream task failed and does not let dependents run on failure, stays
//! `Pending` forever (the same way a cloud batch service leaves a blocked
//! task in the active state).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::exec::backend::{BatchService, RemoteState, ServiceError, ServiceFuture, TaskSubmission};
use crate::exec::task_runner::run_command;

#[derive(Debug)]
struct LocalTask {
    state: watch::Receiver<RemoteState>,
    run_dependents_on_failure: bool,
    runner: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct LocalJob {
    tasks: HashMap<String, LocalTask>,
}

/// Upstream task as seen by a waiting dependent.
struct Upstream {
    task_id: String,
    state: watch::Receiver<RemoteState>,
    run_dependents_on_failure: bool,
}

/// Local, process-backed [`BatchService`]. Task handles are task ids.
#[derive(Debug, Clone, Default)]
pub struct LocalBatchService {
    jobs: Arc<Mutex<HashMap<String, LocalJob>>>,
}

impl LocalBatchService {
    pub fn new() -> Self {
        Self::default()
    }

    async fn submit_inner(
        &self,
        job_id: &str,
        task: TaskSubmission<String>,
    ) -> Result<String, ServiceError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))?;

        if job.tasks.contains_key(&task.task_id) {
            return Err(ServiceError::Rejected(format!(
                "task '{}' already exists in job '{job_id}'",
                task.task_id
            )));
        }

        let mut upstream = Vec::with_capacity(task.dependencies.len());
        for dep in &task.dependencies {
            let dep_task = job.tasks.get(dep).ok_or_else(|| {
                ServiceError::Rejected(format!(
                    "task '{}' depends on unknown task '{dep}'",
                    task.task_id
                ))
            })?;
            upstream.push(Upstream {
                task_id: dep.clone(),
                state: dep_task.state.clone(),
                run_dependents_on_failure: dep_task.run_dependents_on_failure,
            });
        }

        let (tx, rx) = watch::channel(RemoteState::Pending);
        let runner = tokio::spawn(run_when_ready(
            job_id.to_string(),
            task.task_id.clone(),
            task.command,
            upstream,
            tx,
        ));

        debug!(job_id, task = %task.task_id, deps = ?task.dependencies, "task added to local job");
        job.tasks.insert(
            task.task_id.clone(),
            LocalTask {
                state: rx,
                run_dependents_on_failure: task.run_dependents_on_failure,
                runner,
            },
        );

        Ok(task.task_id)
    }
}

impl BatchService for LocalBatchService {
    type Handle = String;

    fn job_exists<'a>(&'a self, job_id: &'a str) -> ServiceFuture<'a, bool> {
        Box::pin(async move { Ok(self.jobs.lock().await.contains_key(job_id)) })
    }

    fn ensure_job<'a>(&'a self, job_id: &'a str) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            let mut jobs = self.jobs.lock().await;
            if jobs.contains_key(job_id) {
                warn!(job_id, "job already exists; no further action taken");
            } else {
                jobs.insert(job_id.to_string(), LocalJob::default());
                info!(job_id, "local job created");
            }
            Ok(())
        })
    }

    fn submit<'a>(
        &'a self,
        job_id: &'a str,
        task: TaskSubmission<String>,
    ) -> ServiceFuture<'a, String> {
        Box::pin(self.submit_inner(job_id, task))
    }

    fn query_state<'a>(&'a self, job_id: &'a str, handle: &'a String) -> ServiceFuture<'a, RemoteState> {
        Box::pin(async move {
            let jobs = self.jobs.lock().await;
            let job = jobs
                .get(job_id)
                .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))?;
            let task = job
                .tasks
                .get(handle)
                .ok_or_else(|| ServiceError::TaskNotFound(handle.clone()))?;
            let state = *task.state.borrow();
            Ok(state)
        })
    }

    fn delete_job<'a>(&'a self, job_id: &'a str) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            let job = self
                .jobs
                .lock()
                .await
                .remove(job_id)
                .ok_or_else(|| ServiceError::JobNotFound(job_id.to_string()))?;

            for (task_id, task) in job.tasks {
                if !task.runner.is_finished() {
                    debug!(job_id, task = %task_id, "aborting task runner");
                    task.runner.abort();
                }
            }
            info!(job_id, "local job deleted");
            Ok(())
        })
    }
}

/// Wait for every upstream task, then run the command unless a blocking
/// upstream failure keeps the task pending.
async fn run_when_ready(
    job_id: String,
    task_id: String,
    command: String,
    upstream: Vec<Upstream>,
    state_tx: watch::Sender<RemoteState>,
) {
    for mut dep in upstream {
        let dep_state = match dep.state.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => {
                warn!(
                    job_id = %job_id,
                    task = %task_id,
                    upstream = %dep.task_id,
                    "upstream task vanished; task stays pending"
                );
                return;
            }
        };

        let blocking_failure = matches!(dep_state, RemoteState::Failed { .. })
            && !dep.run_dependents_on_failure;
        if blocking_failure {
            info!(
                job_id = %job_id,
                task = %task_id,
                upstream = %dep.task_id,
                "upstream task failed; task stays blocked"
            );
            return;
        }
    }

    state_tx.send_replace(RemoteState::Running);

    let outcome = match run_command(&job_id, &task_id, &command).await {
        Ok(state) => state,
        Err(err) => {
            error!(job_id = %job_id, task = %task_id, error = %err, "task execution error");
            RemoteState::Failed { exit_code: None }
        }
    };

    state_tx.send_replace(outcome);
}
