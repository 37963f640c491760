//! Runs the export script and maps its exit to a worker report.

use std::process::Stdio;

use command_group::{AsyncCommandGroup, AsyncGroupChild};
use export_relay_core::{Target, WorkerReport, deadline_after, now_millis};
use serde_json::json;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
};

use crate::{
    command::{CommandBuildError, ExportCommand},
    config::WorkerConfig,
    shell::get_shell_command,
};

/// Environment variable carrying the target id into the script.
pub const TARGET_ENV: &str = "EXPORT_TARGET";

/// Run error.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Command(#[from] CommandBuildError),
    #[error("Working directory not found: {0}")]
    WorkingDirMissing(String),
    #[error("Process error: {0}")]
    Spawn(std::io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured output of one stream.
#[derive(Debug, Default)]
struct Captured {
    text: String,
    total: usize,
}

impl Captured {
    const fn truncated(&self, limit: usize) -> bool {
        self.total > limit
    }
}

/// Runs the configured export command.
#[derive(Debug, Clone)]
pub struct ExportRunner {
    config: WorkerConfig,
}

impl ExportRunner {
    /// Create a runner.
    #[must_use]
    pub const fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run the export for `target`. Never fails: every problem becomes
    /// a failed report.
    pub async fn run(&self, target: &Target) -> WorkerReport {
        match self.try_run(target).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(target_id = %target, "Export could not run: {e}");
                WorkerReport::failure(e.to_string())
            }
        }
    }

    async fn try_run(&self, target: &Target) -> Result<WorkerReport, RunError> {
        let command = ExportCommand::parse(&self.config.command)?;
        command.resolve().await?;

        let mut cmd = self.build(&command, target)?;
        tracing::debug!(target_id = %target, command = command.line(), "Spawning export");
        let mut child = cmd.group_spawn().map_err(RunError::Spawn)?;

        let limit = self.config.max_output_bytes;
        let mut stdout = tokio::spawn(read_bounded(child.inner().stdout.take(), limit));
        let mut stderr = tokio::spawn(read_bounded(child.inner().stderr.take(), limit));

        // One deadline covers the exit and the drain of both pipes.
        let deadline = deadline_after(self.config.timeout());
        let finished = tokio::time::timeout_at(deadline, async {
            let status = child.wait().await?;
            // Leftover group members would keep the pipes open.
            if let Err(e) = child.kill().await {
                tracing::debug!(target_id = %target, "No process group left to reap: {e}");
            }
            let stdout = (&mut stdout).await.unwrap_or_default();
            let stderr = (&mut stderr).await.unwrap_or_default();
            Ok::<_, std::io::Error>((status, stdout, stderr))
        })
        .await;

        let (status, stdout, stderr) = match finished {
            Ok(result) => result?,
            Err(_) => {
                kill_group(&mut child, target).await;
                stdout.abort();
                stderr.abort();
                return Ok(WorkerReport::failure(format!(
                    "Export timed out after {}s",
                    self.config.timeout_secs
                )));
            }
        };
        tracing::debug!(
            target_id = %target,
            code = ?status.code(),
            stdout_bytes = stdout.total,
            stderr_bytes = stderr.total,
            "Export exited"
        );

        if status.success() {
            Ok(WorkerReport::success(
                "Export completed successfully",
                Some(json!({
                    "output_size": stdout.total,
                    "truncated": stdout.truncated(limit),
                    "timestamp": now_millis(),
                })),
            ))
        } else {
            let detail = [stderr.text.trim(), stdout.text.trim()]
                .into_iter()
                .find(|s| !s.is_empty())
                .map_or_else(
                    || {
                        status.code().map_or_else(
                            || "Terminated by signal".to_string(),
                            |code| format!("Exit code: {code}"),
                        )
                    },
                    str::to_string,
                );
            Ok(WorkerReport::failure(format!("Export failed: {detail}")))
        }
    }

    fn build(&self, command: &ExportCommand, target: &Target) -> Result<Command, RunError> {
        let (shell, flag) = get_shell_command();
        let mut cmd = Command::new(shell);
        cmd.arg(flag)
            .arg(command.line())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env(TARGET_ENV, target.as_str())
            .envs(&self.config.env)
            .kill_on_drop(true);

        if let Some(home) = self.config.resolved_home() {
            cmd.env("HOME", home);
        }
        if let Some(dir) = self.config.resolved_working_dir() {
            if !dir.is_dir() {
                return Err(RunError::WorkingDirMissing(dir.display().to_string()));
            }
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }
}

async fn kill_group(child: &mut AsyncGroupChild, target: &Target) {
    tracing::warn!(target_id = %target, "Export timed out, killing process group");
    if let Err(e) = child.kill().await {
        tracing::error!(target_id = %target, "Failed to kill export process: {e}");
    }
}

/// Read a stream to the end, keeping at most `limit` bytes.
async fn read_bounded<R>(reader: Option<R>, limit: usize) -> Captured
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Captured::default();
    };

    let mut kept = Vec::new();
    let mut total = 0usize;
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                total += n;
                let room = limit.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }

    Captured {
        text: String::from_utf8_lossy(&kept).into_owned(),
        total,
    }
}
