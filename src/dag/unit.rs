// src/dag/unit.rs

//! A single unit of work and its adjacency sets.

use std::collections::BTreeSet;
use std::fmt;

/// Index of a [`WorkUnit`] inside its [`WorkGraph`](crate::dag::WorkGraph).
///
/// Ids are only meaningful for the graph that handed them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(pub(crate) usize);

impl UnitId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One schedulable piece of work.
///
/// Built with [`WorkUnit::new`] and the `named` / `allow_downstream_on_failure`
/// builders, then handed to [`WorkGraph::add`](crate::dag::WorkGraph::add).
/// Relationships are declared through the graph so both sides stay in sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    command: String,
    name: Option<String>,
    allow_downstream_on_failure: bool,
    pub(crate) predecessors: BTreeSet<UnitId>,
    pub(crate) successors: BTreeSet<UnitId>,
}

impl WorkUnit {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            name: None,
            allow_downstream_on_failure: false,
            predecessors: BTreeSet::new(),
            successors: BTreeSet::new(),
        }
    }

    /// Give the unit a user-facing id. Ids must be unique within a batch.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// When `true`, a failure of this unit does not block its successors.
    pub fn allow_downstream_on_failure(mut self, allow: bool) -> Self {
        self.allow_downstream_on_failure = allow;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn allows_downstream_on_failure(&self) -> bool {
        self.allow_downstream_on_failure
    }

    /// Units that must reach a terminal state before this one.
    pub fn predecessors(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.predecessors.iter().copied()
    }

    /// Units that list this one as a predecessor.
    pub fn successors(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.successors.iter().copied()
    }
}
