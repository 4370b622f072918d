// src/config/validate.rs

use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{ConfigFile, JobSection, RawConfigFile, RawJobSection};
use crate::errors::{BatchDagError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::BatchDagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_tasks(&raw)?;
        let job = validate_job(&raw.job)?;
        Ok(ConfigFile::new_unchecked(job, raw.tasks))
    }
}

fn validate_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.tasks.is_empty() {
        return Err(BatchDagError::ConfigError(
            "job file must contain at least one [[task]] entry".to_string(),
        ));
    }

    for (pos, task) in cfg.tasks.iter().enumerate() {
        let label = task
            .id
            .clone()
            .unwrap_or_else(|| format!("#{}", pos + 1));

        if task.cmd.trim().is_empty() {
            return Err(BatchDagError::ConfigError(format!(
                "task '{label}' has an empty `cmd`"
            )));
        }
        if let Some(id) = &task.id {
            if id.trim().is_empty() || id.chars().any(char::is_whitespace) {
                return Err(BatchDagError::ConfigError(format!(
                    "task {label}: `id` must be non-empty and contain no whitespace"
                )));
            }
        }
    }
    Ok(())
}

fn validate_job(raw: &RawJobSection) -> Result<JobSection> {
    let defaults = JobSection::default();

    let poll_interval = match raw.poll_interval.as_deref() {
        Some(s) => duration_field("poll_interval", s)?,
        None => defaults.poll_interval,
    };
    if poll_interval.is_zero() {
        return Err(BatchDagError::ConfigError(
            "[job].poll_interval must be greater than zero".to_string(),
        ));
    }

    let timeout = raw
        .timeout
        .as_deref()
        .map(|s| duration_field("timeout", s))
        .transpose()?;

    if let Some(id) = &raw.id {
        if id.trim().is_empty() {
            return Err(BatchDagError::ConfigError(
                "[job].id must not be empty".to_string(),
            ));
        }
    }

    Ok(JobSection {
        id: raw.id.clone(),
        poll_interval,
        timeout,
        submission: raw.submission,
        query_retries: raw.query_retries.unwrap_or(defaults.query_retries),
        delete_when_done: raw.delete_when_done,
    })
}

fn duration_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| BatchDagError::ConfigError(format!("[job].{field}: {e}")))
}
