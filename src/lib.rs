// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod types;

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::{ResolvedStep, Resolver, WorkGraph};
use crate::engine::{Driver, RunOptions};
use crate::exec::LocalBatchService;

pub use crate::engine::run_dag;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - job file loading and graph construction
/// - CLI overrides of the run options
/// - the driver, backed by the local batch service
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading job file '{}'", args.config.display()))?;
    let graph = WorkGraph::from_config(&cfg)?;

    let job_id = job_id(&args, &cfg)?;
    let options = run_options(&args, &cfg);

    if args.dry_run {
        print_dry_run(&graph, &job_id, &options)?;
        return Ok(());
    }

    let driver = Driver::new(LocalBatchService::new(), options);

    let result = tokio::select! {
        res = driver.run_dag(&graph, &job_id) => res?,
        sig = tokio::signal::ctrl_c() => {
            sig.context("failed to listen for Ctrl+C")?;
            warn!(job_id = %job_id, "interrupted; monitoring stopped");
            bail!("interrupted while monitoring job '{job_id}'");
        }
    };

    print!("{result}");

    if !result.is_success() {
        bail!(
            "job '{}' finished with {} unsuccessful task(s)",
            result.job_id,
            result.failures().len()
        );
    }
    info!(job_id = %job_id, "all tasks succeeded");
    Ok(())
}

fn job_id(args: &CliArgs, cfg: &ConfigFile) -> Result<String> {
    args.job
        .clone()
        .or_else(|| cfg.job.id.clone())
        .ok_or_else(|| anyhow!("no job id: set [job].id in the job file or pass --job"))
}

/// Job-file options with command-line overrides applied.
fn run_options(args: &CliArgs, cfg: &ConfigFile) -> RunOptions {
    let mut options = cfg.run_options();
    if let Some(timeout) = args.timeout {
        options.timeout = Some(timeout);
    }
    if let Some(interval) = args.poll_interval {
        options.poll_interval = interval;
    }
    if let Some(mode) = args.submission {
        options.mode = mode;
    }
    if args.delete_job {
        options.delete_job_when_done = true;
    }
    options
}

/// Print the resolved submission order without contacting any service.
fn print_dry_run(graph: &WorkGraph, job_id: &str, options: &RunOptions) -> Result<()> {
    let steps: Vec<ResolvedStep> = Resolver::new(graph).resolve_all()?.collect();
    let names: HashMap<_, _> = steps.iter().map(|s| (s.unit, s.task_id.as_str())).collect();

    println!("batchdag dry-run");
    println!("  job = {job_id}");
    println!("  submission = {:?}", options.mode);
    println!("  poll_interval = {:?}", options.poll_interval);
    match options.timeout {
        Some(t) => println!("  timeout = {t:?}"),
        None => println!("  timeout = none"),
    }
    println!();

    println!("tasks in submission order ({}):", steps.len());
    for (pos, step) in steps.iter().enumerate() {
        println!("  {}. {}", pos + 1, step.task_id);
        println!("      cmd: {}", step.command);
        if !step.predecessors.is_empty() {
            let after: Vec<&str> = step
                .predecessors
                .iter()
                .filter_map(|p| names.get(p).copied())
                .collect();
            println!("      after: {after:?}");
        }
        if step.allow_downstream_on_failure {
            println!("      allow_downstream_on_failure: true");
        }
    }

    debug!("dry-run complete (nothing submitted)");
    Ok(())
}
