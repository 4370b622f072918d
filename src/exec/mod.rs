// src/exec/mod.rs

//! Batch-service layer.
//!
//! - [`backend`] provides the `BatchService` trait the driver talks to, plus
//!   the `RemoteState` and `ServiceError` types shared by every
//!   implementation.
//! - [`local`] is a `BatchService` that runs task commands as local shell
//!   processes and honours dependency declarations.
//! - [`task_runner`] handles individual task process execution.

pub mod backend;
pub mod local;
pub mod task_runner;

pub use backend::{BatchService, RemoteState, ServiceError, ServiceFuture, TaskSubmission};
pub use local::LocalBatchService;
