// src/dag/mod.rs

//! Work-unit graph, resolution and per-run tracking.
//!
//! - [`unit`] holds the `WorkUnit` record and its `UnitId`.
//! - [`graph`] is the arena that owns units and keeps edges symmetric.
//! - [`resolver`] validates a batch and yields a stable topological order.
//! - [`state`] defines per-unit and per-job states.
//! - [`tracker`] is the pure state machine driving a single run.

pub mod graph;
pub mod resolver;
pub mod state;
pub mod tracker;
pub mod unit;

pub use graph::{IntoUnits, WorkGraph};
pub use resolver::{ResolvedStep, ResolvedSteps, Resolver};
pub use state::{FailureReason, JobPhase, UnitState};
pub use tracker::RunTracker;
pub use unit::{UnitId, WorkUnit};
