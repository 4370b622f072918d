// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::exec::ServiceError;

#[derive(Error, Debug)]
pub enum BatchDagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("submission batch is empty; at least one work unit is required")]
    EmptyBatch,

    #[error("unknown work unit {0}; it does not belong to this graph")]
    UnknownUnit(crate::dag::UnitId),

    #[error("cyclic dependency involving task(s): {}", .units.join(", "))]
    CyclicDependency { units: Vec<String> },

    #[error("duplicate task name '{0}' in submission batch")]
    DuplicateTaskName(String),

    #[error("task '{unit}' depends on '{missing}', which is not part of the submission batch")]
    UnresolvedDependency { unit: String, missing: String },

    #[error("could not create job '{job_id}': {source}")]
    JobCreation {
        job_id: String,
        #[source]
        source: ServiceError,
    },

    #[error("submitting task '{unit_id}' failed: {source}")]
    Submission {
        unit_id: String,
        #[source]
        source: ServiceError,
    },

    #[error("querying state of task '{unit_id}' failed: {source}")]
    Query {
        unit_id: String,
        #[source]
        source: ServiceError,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BatchDagError {
    /// Whether this error was raised while validating the graph, i.e. before
    /// anything was sent to the batch service.
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            BatchDagError::EmptyBatch
                | BatchDagError::UnknownUnit(_)
                | BatchDagError::CyclicDependency { .. }
                | BatchDagError::DuplicateTaskName(_)
                | BatchDagError::UnresolvedDependency { .. }
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, BatchDagError>;
