//! Bounded execution of short-lived external commands.
//!
//! [`run_bounded`] is the single place where `git`, `docker` and
//! `docker compose` invocations are spawned and awaited. The child is
//! killed when its timeout fires, and captured output is capped.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::error::OpsError;

/// Maximum stdout or stderr size captured per stream (1 MiB).
const MAX_OUTPUT_BYTES: u64 = 1024 * 1024;

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (`-1` if killed by a signal).
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }

    /// Trimmed stdout.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// The most useful diagnostic: stderr, else stdout, else a placeholder.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        if !stderr.is_empty() {
            stderr.to_string()
        } else if !stdout.is_empty() {
            stdout.to_string()
        } else {
            format!("exit code {}", self.status_code)
        }
    }
}

/// Run `cmd` to completion with `timeout`, capturing stdout and stderr.
///
/// `label` names the command in errors and logs. Spawn failures are
/// returned as [`OpsError::Io`] so callers can tell a missing binary apart
/// from a non-zero exit, which is reported through
/// [`CommandOutput::status_code`].
pub async fn run_bounded(
    cmd: &mut Command,
    timeout: Duration,
    label: &str,
) -> Result<CommandOutput, OpsError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = cmd.spawn()?;

    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();
    let stdout_task = tokio::spawn(read_stream(stdout_handle, "stdout"));
    let stderr_task = tokio::spawn(read_stream(stderr_handle, "stderr"));

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            let output = CommandOutput {
                status_code: status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                duration_ms: start.elapsed().as_millis() as u64,
            };
            tracing::debug!(
                command = label,
                status = output.status_code,
                duration_ms = output.duration_ms,
                "Command finished"
            );
            Ok(output)
        }
        Ok(Err(e)) => Err(OpsError::Io(e)),
        Err(_elapsed) => {
            // `child` is dropped on return, which kills it (`kill_on_drop`).
            tracing::warn!(command = label, timeout_secs = timeout.as_secs(), "Command timed out");
            Err(OpsError::Timeout {
                command: label.to_string(),
                secs: timeout.as_secs(),
            })
        }
    }
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
///
/// A read error keeps whatever arrived before it.
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>, stream: &'static str) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(h) = handle {
        if let Err(e) = h.take(MAX_OUTPUT_BYTES).read_to_end(&mut buf).await {
            tracing::debug!(stream, read_bytes = buf.len(), error = %e, "Output stream read failed");
        }
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
