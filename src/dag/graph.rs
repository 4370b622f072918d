// src/dag/graph.rs

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::config::ConfigFile;
use crate::dag::unit::{UnitId, WorkUnit};
use crate::errors::{BatchDagError, Result};

/// Anything that names one or more units on the other side of an edge.
///
/// Lets `before`/`after` take a single id or a collection of ids.
pub trait IntoUnits {
    fn into_units(self) -> Vec<UnitId>;
}

impl IntoUnits for UnitId {
    fn into_units(self) -> Vec<UnitId> {
        vec![self]
    }
}

impl IntoUnits for Vec<UnitId> {
    fn into_units(self) -> Vec<UnitId> {
        self
    }
}

impl IntoUnits for &[UnitId] {
    fn into_units(self) -> Vec<UnitId> {
        self.to_vec()
    }
}

impl IntoUnits for &Vec<UnitId> {
    fn into_units(self) -> Vec<UnitId> {
        self.clone()
    }
}

impl<const N: usize> IntoUnits for [UnitId; N] {
    fn into_units(self) -> Vec<UnitId> {
        self.to_vec()
    }
}

impl IntoUnits for BTreeSet<UnitId> {
    fn into_units(self) -> Vec<UnitId> {
        self.into_iter().collect()
    }
}

/// Arena of work units keyed by [`UnitId`].
///
/// Adjacency lives on the units as index sets. Every edge is registered on
/// both endpoints, whichever side declared it.
#[derive(Debug, Clone, Default)]
pub struct WorkGraph {
    units: Vec<WorkUnit>,
}

impl WorkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a validated [`ConfigFile`].
    ///
    /// Tasks are added in file order. `after`/`before` entries are resolved
    /// by task id.
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let mut graph = WorkGraph::new();
        let mut by_name: HashMap<&str, UnitId> = HashMap::new();

        for task in cfg.tasks() {
            let mut unit = WorkUnit::new(task.cmd.clone())
                .allow_downstream_on_failure(task.allow_downstream_on_failure);
            if let Some(name) = task.id.as_deref() {
                unit = unit.named(name);
            }
            let id = graph.add(unit);

            if let Some(name) = task.id.as_deref() {
                if by_name.insert(name, id).is_some() {
                    return Err(BatchDagError::DuplicateTaskName(name.to_string()));
                }
            }
        }

        for (idx, task) in cfg.tasks().iter().enumerate() {
            let id = UnitId(idx);
            let label = graph.label(id);

            let lookup = |dep: &String| {
                by_name
                    .get(dep.as_str())
                    .copied()
                    .ok_or_else(|| BatchDagError::UnresolvedDependency {
                        unit: label.clone(),
                        missing: dep.clone(),
                    })
            };

            let upstream = task.after.iter().map(lookup).collect::<Result<Vec<_>>>()?;
            let downstream = task.before.iter().map(lookup).collect::<Result<Vec<_>>>()?;

            graph.after(id, upstream)?;
            graph.before(id, downstream)?;
        }

        debug!(units = graph.len(), "built work graph from config");
        Ok(graph)
    }

    /// Add a unit and return its id.
    ///
    /// Any adjacency already present on `unit` is discarded; edges are only
    /// declared through the graph.
    pub fn add(&mut self, mut unit: WorkUnit) -> UnitId {
        unit.predecessors.clear();
        unit.successors.clear();
        let id = UnitId(self.units.len());
        self.units.push(unit);
        id
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn contains(&self, id: UnitId) -> bool {
        id.0 < self.units.len()
    }

    pub fn unit(&self, id: UnitId) -> Option<&WorkUnit> {
        self.units.get(id.0)
    }

    /// Infallible lookup for ids already checked with [`WorkGraph::contains`].
    pub(crate) fn unit_at(&self, id: UnitId) -> &WorkUnit {
        &self.units[id.0]
    }

    /// All unit ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = UnitId> + '_ {
        (0..self.units.len()).map(UnitId)
    }

    /// Human-readable label: the user-supplied name, or the index.
    pub fn label(&self, id: UnitId) -> String {
        match self.unit(id).and_then(WorkUnit::name) {
            Some(name) => name.to_string(),
            None => id.to_string(),
        }
    }

    /// Declare that `unit` runs before each of `targets`.
    pub fn before(&mut self, unit: UnitId, targets: impl IntoUnits) -> Result<()> {
        let targets = targets.into_units();
        self.declare_edges(targets.iter().map(|&t| (unit, t)).collect())
    }

    /// Declare that `unit` runs after each of `targets`.
    pub fn after(&mut self, unit: UnitId, targets: impl IntoUnits) -> Result<()> {
        let targets = targets.into_units();
        self.declare_edges(targets.iter().map(|&t| (t, unit)).collect())
    }

    /// Alias of [`WorkGraph::before`].
    pub fn set_downstream(&mut self, unit: UnitId, targets: impl IntoUnits) -> Result<()> {
        self.before(unit, targets)
    }

    /// Alias of [`WorkGraph::after`].
    pub fn set_upstream(&mut self, unit: UnitId, targets: impl IntoUnits) -> Result<()> {
        self.after(unit, targets)
    }

    /// Single edge-declaration path behind all four public names.
    ///
    /// Every `(upstream, downstream)` pair is checked first so a rejected call
    /// leaves the graph untouched.
    fn declare_edges(&mut self, edges: Vec<(UnitId, UnitId)>) -> Result<()> {
        for &(upstream, downstream) in &edges {
            for id in [upstream, downstream] {
                if !self.contains(id) {
                    return Err(BatchDagError::UnknownUnit(id));
                }
            }
            if upstream == downstream {
                return Err(BatchDagError::CyclicDependency {
                    units: vec![self.label(upstream)],
                });
            }
        }

        for (upstream, downstream) in edges {
            let added = self.units[upstream.0].successors.insert(downstream);
            self.units[downstream.0].predecessors.insert(upstream);
            if added {
                debug!(
                    upstream = %self.label(upstream),
                    downstream = %self.label(downstream),
                    "declared dependency edge"
                );
            }
        }

        Ok(())
    }
}
