//! Thin `git` command wrapper.
//!
//! Arguments are always passed as an argv vector. Interactive prompts are
//! disabled so a missing credential fails fast instead of hanging.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;

use crate::error::OpsError;
use crate::process::{run_bounded, CommandOutput};

/// Invokes the `git` binary with a fixed extra environment.
#[derive(Debug, Clone)]
pub struct GitClient {
    program: String,
    env: Vec<(String, String)>,
}

impl Default for GitClient {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
            env: Vec::new(),
        }
    }
}

impl GitClient {
    /// Add an environment variable to every invocation.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run `git <args>` in `cwd` and return the captured output, whatever the exit code.
    pub async fn run(
        &self,
        cwd: Option<&Path>,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, OpsError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C");
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        run_bounded(&mut cmd, timeout, &label(args)).await
    }

    /// Like [`run`](Self::run), but a non-zero exit becomes [`OpsError::Git`].
    pub async fn run_checked(
        &self,
        cwd: Option<&Path>,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, OpsError> {
        let output = self.run(cwd, args, timeout).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(OpsError::Git {
                command: label(args),
                output: output.diagnostic(),
            })
        }
    }
}

fn label(args: &[&str]) -> String {
    let mut label = String::from("git");
    for arg in args.iter().take(3) {
        label.push(' ');
        label.push_str(arg);
    }
    label
}
