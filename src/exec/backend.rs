// src/exec/backend.rs

//! Pluggable batch-service abstraction.
//!
//! The driver talks to a `BatchService` instead of a concrete cloud SDK.
//! This makes it easy to swap in a fake service in tests while keeping the
//! local process-backed implementation in [`crate::exec::local`].
//!
//! - `LocalBatchService` runs task commands as local shell processes.
//! - Tests can provide their own `BatchService` that, for example, records
//!   submissions and scripts the states returned by `query_state`.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;

use thiserror::Error;

/// Boxed future returned by every [`BatchService`] operation.
pub type ServiceFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ServiceError>> + Send + 'a>>;

/// State of a task as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Pending,
    Running,
    Succeeded,
    Failed { exit_code: Option<i32> },
}

impl RemoteState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RemoteState::Succeeded | RemoteState::Failed { .. })
    }
}

/// Errors raised by a batch service.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("job '{0}' not found")]
    JobNotFound(String),

    #[error("pool unusable: {0}")]
    PoolUnusable(String),

    #[error("task '{0}' not found")]
    TaskNotFound(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Errors that make the whole job unusable. A run aborts on these instead
    /// of recording a per-unit failure.
    pub fn is_job_fatal(&self) -> bool {
        matches!(self, ServiceError::JobNotFound(_) | ServiceError::PoolUnusable(_))
    }
}

/// Everything the service needs to create one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSubmission<H> {
    pub task_id: String,
    pub command: String,
    /// Handles of already-submitted upstream tasks.
    pub dependencies: Vec<H>,
    /// If `true`, dependents of this task run even when it fails.
    pub run_dependents_on_failure: bool,
}

/// Trait abstracting the remote batch service.
///
/// Production code uses [`crate::exec::LocalBatchService`] or a cloud
/// implementation living outside this crate; tests provide fakes.
pub trait BatchService: Send + Sync {
    /// Opaque reference to a submitted task.
    type Handle: Clone + Eq + Hash + Debug + Send + Sync;

    fn job_exists<'a>(&'a self, job_id: &'a str) -> ServiceFuture<'a, bool>;

    /// Create the job if it does not exist yet. Must be idempotent.
    fn ensure_job<'a>(&'a self, job_id: &'a str) -> ServiceFuture<'a, ()>;

    fn submit<'a>(
        &'a self,
        job_id: &'a str,
        task: TaskSubmission<Self::Handle>,
    ) -> ServiceFuture<'a, Self::Handle>;

    fn query_state<'a>(
        &'a self,
        job_id: &'a str,
        handle: &'a Self::Handle,
    ) -> ServiceFuture<'a, RemoteState>;

    /// Delete the job and whatever still runs in it.
    fn delete_job<'a>(&'a self, job_id: &'a str) -> ServiceFuture<'a, ()>;
}
