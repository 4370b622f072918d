#![allow(dead_code)]

use batchdag::config::{ConfigFile, RawConfigFile, RawJobSection, TaskConfig};
use batchdag::dag::{UnitId, WorkGraph, WorkUnit};
use batchdag::types::SubmissionMode;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                job: RawJobSection::default(),
                tasks: vec![],
            },
        }
    }

    pub fn job_id(mut self, id: &str) -> Self {
        self.config.job.id = Some(id.to_string());
        self
    }

    pub fn poll_interval(mut self, value: &str) -> Self {
        self.config.job.poll_interval = Some(value.to_string());
        self
    }

    pub fn timeout(mut self, value: &str) -> Self {
        self.config.job.timeout = Some(value.to_string());
        self
    }

    pub fn submission(mut self, mode: SubmissionMode) -> Self {
        self.config.job.submission = mode;
        self
    }

    pub fn with_task(mut self, task: TaskConfig) -> Self {
        self.config.tasks.push(task);
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                id: None,
                cmd: cmd.to_string(),
                after: vec![],
                before: vec![],
                allow_downstream_on_failure: false,
            },
        }
    }

    /// Task with `id` whose command is `echo <id>`.
    pub fn named(id: &str) -> Self {
        Self::new(&format!("echo {id}")).id(id)
    }

    pub fn id(mut self, id: &str) -> Self {
        self.task.id = Some(id.to_string());
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn before(mut self, dependent: &str) -> Self {
        self.task.before.push(dependent.to_string());
        self
    }

    pub fn allow_downstream_on_failure(mut self, val: bool) -> Self {
        self.task.allow_downstream_on_failure = val;
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// Add a named unit whose command is `echo <name>`.
pub fn add_named(graph: &mut WorkGraph, name: &str) -> UnitId {
    graph.add(WorkUnit::new(format!("echo {name}")).named(name))
}

/// Add a named unit that lets its dependents run when it fails.
pub fn add_tolerant(graph: &mut WorkGraph, name: &str) -> UnitId {
    graph.add(
        WorkUnit::new(format!("echo {name}"))
            .named(name)
            .allow_downstream_on_failure(true),
    )
}

/// Graph `a -> b -> ... ` with one unit per name, each after the previous.
pub fn chain(names: &[&str]) -> (WorkGraph, Vec<UnitId>) {
    let mut graph = WorkGraph::new();
    let ids: Vec<UnitId> = names.iter().map(|n| add_named(&mut graph, n)).collect();
    for pair in ids.windows(2) {
        graph
            .before(pair[0], pair[1])
            .expect("chain edges are always valid");
    }
    (graph, ids)
}
