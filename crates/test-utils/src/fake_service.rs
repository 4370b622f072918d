use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use batchdag::exec::{BatchService, RemoteState, ServiceError, ServiceFuture, TaskSubmission};

/// Handle returned by [`FakeBatchService::submit`]: position in submission
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FakeHandle(pub usize);

/// Error to inject into a fake call. Turned into a fresh [`ServiceError`]
/// each time it fires.
#[derive(Debug, Clone)]
pub enum Fault {
    JobNotFound,
    PoolUnusable(String),
    Rejected(String),
    Unavailable(String),
}

impl Fault {
    fn to_error(&self, job_id: &str) -> ServiceError {
        match self {
            Fault::JobNotFound => ServiceError::JobNotFound(job_id.to_string()),
            Fault::PoolUnusable(msg) => ServiceError::PoolUnusable(msg.clone()),
            Fault::Rejected(msg) => ServiceError::Rejected(msg.clone()),
            Fault::Unavailable(msg) => ServiceError::Unavailable(msg.clone()),
        }
    }
}

/// One recorded `submit` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTask {
    pub task_id: String,
    pub command: String,
    /// Task ids behind the dependency handles.
    pub dependencies: Vec<String>,
    pub run_dependents_on_failure: bool,
    /// Whether every dependency was already terminal when this task was
    /// submitted.
    pub upstream_terminal: bool,
}

#[derive(Debug, Clone)]
struct TaskScript {
    /// Queries answered with `Running` before the outcome is reported.
    running_polls: u32,
    outcome: RemoteState,
    submit_fault: Option<Fault>,
    /// Queries that fail with `Unavailable` before the task answers again.
    flaky_queries: u32,
    /// Every query fails with this fault.
    broken_queries: Option<Fault>,
}

impl Default for TaskScript {
    fn default() -> Self {
        Self {
            running_polls: 0,
            outcome: RemoteState::Succeeded,
            submit_fault: None,
            flaky_queries: 0,
            broken_queries: None,
        }
    }
}

#[derive(Debug)]
struct FakeTask {
    task_id: String,
    deps: Vec<usize>,
    run_dependents_on_failure: bool,
    polls: u32,
    state: RemoteState,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashSet<String>,
    exists_fault: Option<Fault>,
    ensure_fault: Option<Fault>,
    delete_fault: Option<Fault>,
    scripts: HashMap<String, TaskScript>,
    tasks: Vec<FakeTask>,
    submissions: Vec<SubmittedTask>,
    events: Vec<String>,
    deleted_jobs: Vec<String>,
}

impl Inner {
    fn script_mut(&mut self, task_id: &str) -> &mut TaskScript {
        self.scripts.entry(task_id.to_string()).or_default()
    }

    fn script(&self, task_id: &str) -> TaskScript {
        self.scripts.get(task_id).cloned().unwrap_or_default()
    }

    fn require_job(&self, job_id: &str) -> Result<(), ServiceError> {
        if self.jobs.contains(job_id) {
            Ok(())
        } else {
            Err(ServiceError::JobNotFound(job_id.to_string()))
        }
    }

    fn submit(
        &mut self,
        job_id: &str,
        task: TaskSubmission<FakeHandle>,
    ) -> Result<FakeHandle, ServiceError> {
        self.events.push(format!("submit:{}", task.task_id));
        self.require_job(job_id)?;

        if let Some(fault) = &self.script(&task.task_id).submit_fault {
            return Err(fault.to_error(job_id));
        }

        let mut deps = Vec::with_capacity(task.dependencies.len());
        for FakeHandle(idx) in &task.dependencies {
            if *idx >= self.tasks.len() {
                return Err(ServiceError::Rejected(format!(
                    "task '{}' depends on unknown handle {idx}",
                    task.task_id
                )));
            }
            deps.push(*idx);
        }

        let upstream_terminal = deps.iter().all(|&d| self.tasks[d].state.is_terminal());
        self.submissions.push(SubmittedTask {
            task_id: task.task_id.clone(),
            command: task.command,
            dependencies: deps.iter().map(|&d| self.tasks[d].task_id.clone()).collect(),
            run_dependents_on_failure: task.run_dependents_on_failure,
            upstream_terminal,
        });

        let handle = FakeHandle(self.tasks.len());
        self.tasks.push(FakeTask {
            task_id: task.task_id,
            deps,
            run_dependents_on_failure: task.run_dependents_on_failure,
            polls: 0,
            state: RemoteState::Pending,
        });
        Ok(handle)
    }

    fn query(&mut self, job_id: &str, FakeHandle(idx): FakeHandle) -> Result<RemoteState, ServiceError> {
        let task_id = self
            .tasks
            .get(idx)
            .map(|t| t.task_id.clone())
            .ok_or_else(|| ServiceError::TaskNotFound(format!("handle {idx}")))?;
        self.events.push(format!("query:{task_id}"));
        self.require_job(job_id)?;

        let script = self.script(&task_id);
        if let Some(fault) = &script.broken_queries {
            return Err(fault.to_error(job_id));
        }
        if script.flaky_queries > 0 {
            self.script_mut(&task_id).flaky_queries -= 1;
            return Err(ServiceError::Unavailable(format!("flaky query for '{task_id}'")));
        }

        if self.tasks[idx].state.is_terminal() {
            return Ok(self.tasks[idx].state);
        }

        // The service holds a task back until its dependencies are terminal;
        // a failed dependency that does not let dependents run keeps it
        // pending for good.
        for &dep in &self.tasks[idx].deps {
            let upstream = &self.tasks[dep];
            match upstream.state {
                RemoteState::Succeeded => {}
                RemoteState::Failed { .. } if upstream.run_dependents_on_failure => {}
                _ => return Ok(RemoteState::Pending),
            }
        }

        let task = &mut self.tasks[idx];
        task.polls = task.polls.saturating_add(1);
        task.state = if task.polls > script.running_polls {
            script.outcome
        } else {
            RemoteState::Running
        };
        Ok(task.state)
    }
}

/// Scriptable in-memory [`BatchService`].
///
/// By default every task succeeds on its first query once its dependencies
/// are done. Clones share state, so a test can keep one clone for
/// inspection and hand another to the driver.
#[derive(Debug, Clone, Default)]
pub struct FakeBatchService {
    inner: Arc<Mutex<Inner>>,
}

impl FakeBatchService {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner(self, f: impl FnOnce(&mut Inner)) -> Self {
        f(&mut self.inner.lock().unwrap());
        self
    }

    // -- scripting ---------------------------------------------------------

    pub fn with_existing_job(self, job_id: &str) -> Self {
        self.with_inner(|i| {
            i.jobs.insert(job_id.to_string());
        })
    }

    /// Report `Running` for `polls` queries, then `Succeeded`.
    pub fn succeed_after(self, task_id: &str, polls: u32) -> Self {
        self.with_inner(|i| i.script_mut(task_id).running_polls = polls)
    }

    pub fn fail(self, task_id: &str, exit_code: i32) -> Self {
        self.fail_after(task_id, 0, exit_code)
    }

    pub fn fail_after(self, task_id: &str, polls: u32, exit_code: i32) -> Self {
        self.with_inner(|i| {
            let script = i.script_mut(task_id);
            script.running_polls = polls;
            script.outcome = RemoteState::Failed {
                exit_code: Some(exit_code),
            };
        })
    }

    /// The task runs forever.
    pub fn never_finish(self, task_id: &str) -> Self {
        self.succeed_after(task_id, u32::MAX)
    }

    pub fn reject_submit(self, task_id: &str, fault: Fault) -> Self {
        self.with_inner(|i| i.script_mut(task_id).submit_fault = Some(fault))
    }

    /// The first `n` queries of the task fail with `Unavailable`.
    pub fn flaky_queries(self, task_id: &str, n: u32) -> Self {
        self.with_inner(|i| i.script_mut(task_id).flaky_queries = n)
    }

    /// Every query of the task fails with `fault`.
    pub fn broken_queries(self, task_id: &str, fault: Fault) -> Self {
        self.with_inner(|i| i.script_mut(task_id).broken_queries = Some(fault))
    }

    pub fn fail_job_exists(self, fault: Fault) -> Self {
        self.with_inner(|i| i.exists_fault = Some(fault))
    }

    pub fn fail_ensure_job(self, fault: Fault) -> Self {
        self.with_inner(|i| i.ensure_fault = Some(fault))
    }

    pub fn fail_delete(self, fault: Fault) -> Self {
        self.with_inner(|i| i.delete_fault = Some(fault))
    }

    // -- inspection --------------------------------------------------------

    pub fn submissions(&self) -> Vec<SubmittedTask> {
        self.inner.lock().unwrap().submissions.clone()
    }

    pub fn submitted_ids(&self) -> Vec<String> {
        self.submissions().into_iter().map(|s| s.task_id).collect()
    }

    pub fn submission(&self, task_id: &str) -> Option<SubmittedTask> {
        self.submissions().into_iter().find(|s| s.task_id == task_id)
    }

    /// Every call in order, e.g. `"ensure_job:j"`, `"submit:a"`, `"query:a"`.
    pub fn events(&self) -> Vec<String> {
        self.inner.lock().unwrap().events.clone()
    }

    pub fn query_count(&self, task_id: &str) -> usize {
        let wanted = format!("query:{task_id}");
        self.events().iter().filter(|e| **e == wanted).count()
    }

    pub fn has_job(&self, job_id: &str) -> bool {
        self.inner.lock().unwrap().jobs.contains(job_id)
    }

    pub fn deleted_jobs(&self) -> Vec<String> {
        self.inner.lock().unwrap().deleted_jobs.clone()
    }
}

impl BatchService for FakeBatchService {
    type Handle = FakeHandle;

    fn job_exists<'a>(&'a self, job_id: &'a str) -> ServiceFuture<'a, bool> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.events.push(format!("job_exists:{job_id}"));
            if let Some(fault) = &inner.exists_fault {
                return Err(fault.to_error(job_id));
            }
            Ok(inner.jobs.contains(job_id))
        })
    }

    fn ensure_job<'a>(&'a self, job_id: &'a str) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.events.push(format!("ensure_job:{job_id}"));
            if let Some(fault) = &inner.ensure_fault {
                return Err(fault.to_error(job_id));
            }
            inner.jobs.insert(job_id.to_string());
            Ok(())
        })
    }

    fn submit<'a>(
        &'a self,
        job_id: &'a str,
        task: TaskSubmission<FakeHandle>,
    ) -> ServiceFuture<'a, FakeHandle> {
        Box::pin(async move { self.inner.lock().unwrap().submit(job_id, task) })
    }

    fn query_state<'a>(
        &'a self,
        job_id: &'a str,
        handle: &'a FakeHandle,
    ) -> ServiceFuture<'a, RemoteState> {
        Box::pin(async move { self.inner.lock().unwrap().query(job_id, *handle) })
    }

    fn delete_job<'a>(&'a self, job_id: &'a str) -> ServiceFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap();
            inner.events.push(format!("delete_job:{job_id}"));
            if let Some(fault) = &inner.delete_fault {
                return Err(fault.to_error(job_id));
            }
            inner.require_job(job_id)?;
            inner.jobs.remove(job_id);
            inner.deleted_jobs.push(job_id.to_string());
            Ok(())
        })
    }
}
