// src/config/model.rs

use std::time::Duration;

use serde::Deserialize;

use crate::engine::RunOptions;
use crate::types::SubmissionMode;

/// Top-level job file as read from TOML, before validation.
///
/// ```toml
/// [job]
/// id = "analysis"
/// poll_interval = "5s"
/// timeout = "PT2H"
///
/// [[task]]
/// id = "fetch"
/// cmd = "python fetch.py"
///
/// [[task]]
/// cmd = "python report.py"
/// after = ["fetch"]
/// ```
///
/// Every section is optional at this level; [`ConfigFile`]'s `TryFrom`
/// impl enforces what must be present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    /// Job-level settings from `[job]`.
    #[serde(default)]
    pub job: RawJobSection,

    /// Tasks from `[[task]]`, in file order.
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskConfig>,
}

/// `[job]` section with durations still as strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJobSection {
    /// Job id; may be supplied on the command line instead.
    #[serde(default)]
    pub id: Option<String>,

    /// e.g. `"5s"` or `"PT5S"`. Defaults to 5 seconds.
    #[serde(default)]
    pub poll_interval: Option<String>,

    /// Monitoring timeout; no timeout when absent.
    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default)]
    pub submission: SubmissionMode,

    /// Extra state-query attempts per poll cycle.
    #[serde(default)]
    pub query_retries: Option<u32>,

    #[serde(default)]
    pub delete_when_done: bool,
}

/// `[[task]]` entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskConfig {
    /// Optional task id. Tasks without one get a generated id at
    /// submission time and cannot be referenced from `before`/`after`.
    #[serde(default)]
    pub id: Option<String>,

    /// The command to execute.
    pub cmd: String,

    /// Tasks this task waits for.
    #[serde(default)]
    pub after: Vec<String>,

    /// Tasks that wait for this task.
    #[serde(default)]
    pub before: Vec<String>,

    /// Let dependents run even if this task fails.
    #[serde(default)]
    pub allow_downstream_on_failure: bool,
}

/// Validated `[job]` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSection {
    pub id: Option<String>,
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
    pub submission: SubmissionMode,
    pub query_retries: u32,
    pub delete_when_done: bool,
}

impl Default for JobSection {
    fn default() -> Self {
        let defaults = RunOptions::default();
        Self {
            id: None,
            poll_interval: defaults.poll_interval,
            timeout: defaults.timeout,
            submission: defaults.mode,
            query_retries: defaults.query_retries,
            delete_when_done: defaults.delete_job_when_done,
        }
    }
}

/// Validated job file.
///
/// Only constructed through `TryFrom<RawConfigFile>`, so a `ConfigFile`
/// always has at least one task and parsed durations. Graph-level problems
/// (duplicate ids, unknown references, cycles) are reported when the
/// [`crate::dag::WorkGraph`] is built and resolved.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub job: JobSection,
    tasks: Vec<TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(job: JobSection, tasks: Vec<TaskConfig>) -> Self {
        Self { job, tasks }
    }

    pub fn tasks(&self) -> &[TaskConfig] {
        &self.tasks
    }

    /// Run options derived from `[job]`, with defaults for everything the
    /// file does not control.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            timeout: self.job.timeout,
            poll_interval: self.job.poll_interval,
            mode: self.job.submission,
            query_retries: self.job.query_retries,
            delete_job_when_done: self.job.delete_when_done,
            ..RunOptions::default()
        }
    }
}
