// src/exec/task_runner.rs

//! Individual task process runner for the local batch service.

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::exec::RemoteState;

/// Run one task command to completion and translate its exit status.
///
/// stdout and stderr are consumed line by line and logged at debug so pipes
/// never fill up. The child is killed if this future is dropped.
pub async fn run_command(job_id: &str, task_id: &str, command: &str) -> Result<RemoteState> {
    info!(job_id, task = %task_id, cmd = %command, "starting task process");

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{task_id}'"))?;

    if let Some(stdout) = child.stdout.take() {
        drain_lines(task_id.to_string(), "stdout", stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        drain_lines(task_id.to_string(), "stderr", stderr);
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of task '{task_id}'"))?;

    let code = status.code();
    info!(
        job_id,
        task = %task_id,
        exit_code = ?code,
        success = status.success(),
        "task process exited"
    );

    Ok(if status.success() {
        RemoteState::Succeeded
    } else {
        RemoteState::Failed { exit_code: code }
    })
}

fn drain_lines<R>(task_id: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(task = %task_id, stream, "{}", line);
        }
    });
}
