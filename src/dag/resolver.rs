// src/dag/resolver.rs

//! Validation and stable topological ordering of a submission batch.
//!
//! The resolver never talks to the batch service. It checks the batch for
//! duplicate names, references that leave the batch and cycles, then hands
//! out a lazy [`ResolvedSteps`] iterator in which every unit appears after all
//! of its predecessors.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graphmap::DiGraphMap;
use tracing::{debug, warn};

use crate::dag::graph::WorkGraph;
use crate::dag::unit::{UnitId, WorkUnit};
use crate::errors::{BatchDagError, Result};

/// One entry of the resolved submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStep {
    pub unit: UnitId,
    /// Task id used on the batch service: the user-supplied name, or a
    /// generated `task-<n>`.
    pub task_id: String,
    pub command: String,
    /// Predecessors in batch order. All of them were yielded earlier.
    pub predecessors: Vec<UnitId>,
    pub allow_downstream_on_failure: bool,
}

impl ResolvedStep {
    /// Look up the handles of this step's predecessors.
    ///
    /// Predecessors without a recorded handle (never submitted) are skipped.
    pub fn dependency_handles<H: Clone>(&self, handles: &HashMap<UnitId, H>) -> Vec<H> {
        self.predecessors
            .iter()
            .filter_map(|p| handles.get(p).cloned())
            .collect()
    }
}

/// Pure graph computation over a borrowed [`WorkGraph`].
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'g> {
    graph: &'g WorkGraph,
}

impl<'g> Resolver<'g> {
    pub fn new(graph: &'g WorkGraph) -> Self {
        Self { graph }
    }

    /// Resolve every unit of the graph, in insertion order.
    pub fn resolve_all(&self) -> Result<ResolvedSteps> {
        let members: Vec<UnitId> = self.graph.ids().collect();
        self.resolve(&members)
    }

    /// Resolve the given batch members.
    ///
    /// The order of `members` is the tie-break order for units that have no
    /// ordering constraint between them.
    pub fn resolve(&self, members: &[UnitId]) -> Result<ResolvedSteps> {
        let members = self.dedup_members(members)?;
        if members.is_empty() {
            return Err(BatchDagError::EmptyBatch);
        }

        let position: HashMap<UnitId, usize> =
            members.iter().enumerate().map(|(pos, &id)| (id, pos)).collect();

        self.check_duplicate_names(&members)?;
        self.check_references(&members, &position)?;
        self.check_cycles(&members, &position)?;

        let task_ids = self.assign_task_ids(&members);
        let members_len = members.len();

        let mut predecessors = Vec::with_capacity(members.len());
        let mut successors = Vec::with_capacity(members.len());
        for &id in &members {
            let unit = self.unit_of(id);
            let mut preds: Vec<usize> = unit.predecessors().map(|p| position[&p]).collect();
            let mut succs: Vec<usize> = unit.successors().map(|s| position[&s]).collect();
            preds.sort_unstable();
            succs.sort_unstable();
            predecessors.push(preds);
            successors.push(succs);
        }

        let in_degree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
        let ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, deg)| **deg == 0)
            .map(|(pos, _)| Reverse(pos))
            .collect();

        let commands = members
            .iter()
            .map(|&id| self.unit_of(id).command().to_string())
            .collect();
        let tolerant = members
            .iter()
            .map(|&id| self.unit_of(id).allows_downstream_on_failure())
            .collect();

        debug!(units = members.len(), roots = ready.len(), "batch resolved");

        Ok(ResolvedSteps {
            members,
            task_ids,
            commands,
            tolerant,
            predecessors,
            successors,
            in_degree,
            ready,
            remaining: members_len,
        })
    }

    /// Members are checked against the graph in `dedup_members`.
    fn unit_of(&self, id: UnitId) -> &'g WorkUnit {
        self.graph.unit_at(id)
    }

    fn dedup_members(&self, members: &[UnitId]) -> Result<Vec<UnitId>> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(members.len());
        for &id in members {
            if !self.graph.contains(id) {
                return Err(BatchDagError::UnknownUnit(id));
            }
            if seen.insert(id) {
                out.push(id);
            } else {
                warn!(unit = %id, "unit listed twice in batch; keeping first occurrence");
            }
        }
        Ok(out)
    }

    fn check_duplicate_names(&self, members: &[UnitId]) -> Result<()> {
        let mut names = HashSet::new();
        for &id in members {
            if let Some(name) = self.unit_of(id).name() {
                if !names.insert(name) {
                    return Err(BatchDagError::DuplicateTaskName(name.to_string()));
                }
            }
        }
        Ok(())
    }

    fn check_references(
        &self,
        members: &[UnitId],
        position: &HashMap<UnitId, usize>,
    ) -> Result<()> {
        for &id in members {
            let unit = self.unit_of(id);
            if let Some(missing) = unit
                .predecessors()
                .chain(unit.successors())
                .find(|other| !position.contains_key(other))
            {
                return Err(BatchDagError::UnresolvedDependency {
                    unit: self.graph.label(id),
                    missing: self.graph.label(missing),
                });
            }
        }
        Ok(())
    }

    fn check_cycles(&self, members: &[UnitId], position: &HashMap<UnitId, usize>) -> Result<()> {
        // Edge direction: predecessor -> unit.
        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
        for pos in 0..members.len() {
            graph.add_node(pos);
        }
        for (pos, &id) in members.iter().enumerate() {
            for pred in self.unit_of(id).predecessors() {
                graph.add_edge(position[&pred], pos, ());
            }
        }

        match toposort(&graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => {
                let node = cycle.node_id();
                let mut component = tarjan_scc(&graph)
                    .into_iter()
                    .find(|scc| scc.contains(&node))
                    .unwrap_or_else(|| vec![node]);
                component.sort_unstable();
                let units = component
                    .into_iter()
                    .map(|pos| self.graph.label(members[pos]))
                    .collect();
                Err(BatchDagError::CyclicDependency { units })
            }
        }
    }

    /// User-supplied names win; unnamed units get `task-<position>`, with a
    /// suffix if that collides with a user name.
    fn assign_task_ids(&self, members: &[UnitId]) -> Vec<String> {
        let taken: HashSet<&str> = members
            .iter()
            .filter_map(|&id| self.unit_of(id).name())
            .collect();

        members
            .iter()
            .enumerate()
            .map(|(pos, &id)| match self.unit_of(id).name() {
                Some(name) => name.to_string(),
                None => generate_task_id(pos + 1, &taken),
            })
            .collect()
    }
}

fn generate_task_id(n: usize, taken: &HashSet<&str>) -> String {
    let base = format!("task-{n}");
    if !taken.contains(base.as_str()) {
        return base;
    }
    let mut k = 1;
    loop {
        let candidate = format!("{base}-{k}");
        if !taken.contains(candidate.as_str()) {
            return candidate;
        }
        k += 1;
    }
}

/// Lazy, consuming sequence of [`ResolvedStep`]s in submission-safe order.
///
/// Ordering is Kahn's algorithm with a min-heap on batch position, so the
/// sequence is deterministic and keeps input order among unconstrained
/// units.
#[derive(Debug, Clone)]
pub struct ResolvedSteps {
    members: Vec<UnitId>,
    task_ids: Vec<String>,
    commands: Vec<String>,
    tolerant: Vec<bool>,
    predecessors: Vec<Vec<usize>>,
    successors: Vec<Vec<usize>>,
    in_degree: Vec<usize>,
    ready: BinaryHeap<Reverse<usize>>,
    remaining: usize,
}

impl ResolvedSteps {
    /// Number of units in the batch.
    pub fn batch_len(&self) -> usize {
        self.members.len()
    }
}

impl Iterator for ResolvedSteps {
    type Item = ResolvedStep;

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse(pos) = self.ready.pop()?;
        self.remaining -= 1;

        for &succ in &self.successors[pos] {
            self.in_degree[succ] -= 1;
            if self.in_degree[succ] == 0 {
                self.ready.push(Reverse(succ));
            }
        }

        Some(ResolvedStep {
            unit: self.members[pos],
            task_id: self.task_ids[pos].clone(),
            command: self.commands[pos].clone(),
            predecessors: self.predecessors[pos]
                .iter()
                .map(|&p| self.members[p])
                .collect(),
            allow_downstream_on_failure: self.tolerant[pos],
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for ResolvedSteps {}
