//! Infrastructure implementation of the `CommandRunner` port.
//!
//! `TokioCommandRunner` is the production implementation that uses tokio
//! for async process execution with guaranteed timeout and kill.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::application::ports::CommandRunner;
use crate::domain::error::DeployError;

/// Default timeout for host setup commands (package installs, image pulls).
pub const DEFAULT_CMD_TIMEOUT: Duration = Duration::from_secs(3600);

/// Timeout for short commands whose output is captured.
pub const CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);

/// Production `CommandRunner`.
///
/// Every child runs in its own process group. On timeout or Ctrl-C the
/// whole group receives SIGTERM and the child itself is killed, so shell
/// pipelines do not leave orphans behind. Output lines go to the log.
pub struct TokioCommandRunner {
    timeout: Duration,
}

impl TokioCommandRunner {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TokioCommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_CMD_TIMEOUT)
    }
}

/// Human-readable command line, for logs and error messages.
#[must_use]
pub fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

async fn drain<R: AsyncRead + Unpin>(reader: Option<R>, stream: &str, keep: bool) -> String {
    let mut kept = String::new();
    let Some(reader) = reader else {
        return kept;
    };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(stream, "{line}");
        if keep {
            kept.push_str(&line);
            kept.push('\n');
        }
    }
    kept
}

async fn terminate_group(child: &mut tokio::process::Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        let group = format!("-{pid}");
        let _ = tokio::process::Command::new("kill")
            .args(["-TERM", "--", &group])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
    }
    #[cfg(not(unix))]
    let _ = pid;
    let _ = child.kill().await;
}

impl TokioCommandRunner {
    async fn execute(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
        keep_stdout: bool,
    ) -> Result<(ExitStatus, String)> {
        let shown = command_line(program, args);
        tracing::info!(command = %shown, "$");

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;
        let pid = child.id();
        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();

        tokio::select! {
            result = async {
                let (status, stdout, _) = tokio::join!(
                    child.wait(),
                    drain(stdout_handle, "stdout", keep_stdout),
                    drain(stderr_handle, "stderr", false),
                );
                let status = status.with_context(|| format!("waiting for {program}"))?;
                tracing::debug!(command = %shown, %status, "exited");
                Ok((status, stdout))
            } => result,
            () = tokio::time::sleep(timeout) => {
                terminate_group(&mut child, pid).await;
                Err(DeployError::Timeout { what: shown, secs: timeout.as_secs() }.into())
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!(command = %shown, "Ctrl-C received, terminating command");
                terminate_group(&mut child, pid).await;
                Err(DeployError::Interrupted { command: shown }.into())
            }
        }
    }
}

impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<ExitStatus> {
        self.run_with_timeout(program, args, self.timeout).await
    }

    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ExitStatus> {
        let (status, _) = self.execute(program, args, timeout, false).await?;
        Ok(status)
    }

    async fn capture(&self, program: &str, args: &[&str]) -> Result<String> {
        let (status, stdout) = self
            .execute(program, args, CAPTURE_TIMEOUT.min(self.timeout), true)
            .await?;
        if !status.success() {
            return Err(DeployError::ExternalFailure {
                command: command_line(program, args),
                status: status.to_string(),
            }
            .into());
        }
        Ok(stdout.trim().to_string())
    }
}
