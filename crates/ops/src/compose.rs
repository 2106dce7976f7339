//! `docker compose` invocations used to bring up the tunnel sidecar.

use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::process::Command;

use crate::error::{OpsError, OpsResult};
use crate::process::run_bounded;

/// Compose profile and service of the tunnel sidecar.
pub const TUNNEL_PROFILE: &str = "tailscale";
pub const TUNNEL_SERVICE: &str = "tailscale";

/// Runs compose via the v2 plugin, or the standalone v1 binary if that is
/// all the host has.
#[derive(Debug, Clone)]
pub struct ComposeClient {
    docker_program: String,
    standalone_program: String,
    timeout: Duration,
}

impl ComposeClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            docker_program: "docker".to_string(),
            standalone_program: "docker-compose".to_string(),
            timeout,
        }
    }

    /// The argv prefix that runs compose on this host.
    pub async fn detect_prefix(&self) -> OpsResult<Vec<String>> {
        let mut plugin = Command::new(&self.docker_program);
        plugin.args(["compose", "version"]);
        if matches!(run_bounded(&mut plugin, self.timeout, "docker compose version").await, Ok(out) if out.success())
        {
            return Ok(vec![self.docker_program.clone(), "compose".to_string()]);
        }

        let mut standalone = Command::new(&self.standalone_program);
        standalone.arg("version");
        if matches!(run_bounded(&mut standalone, self.timeout, "docker-compose version").await, Ok(out) if out.success())
        {
            return Ok(vec![self.standalone_program.clone()]);
        }

        Err(OpsError::Orchestration(
            "docker compose (or docker-compose) is not installed on the server".into(),
        ))
    }

    /// `compose --profile tailscale up -d tailscale` in `project_dir`.
    pub async fn up_tunnel(
        &self,
        project_dir: &Path,
        env: &IndexMap<String, String>,
    ) -> OpsResult<()> {
        let prefix = self.detect_prefix().await?;
        let (program, base) = prefix
            .split_first()
            .ok_or_else(|| OpsError::Orchestration("empty compose command".into()))?;

        let mut cmd = Command::new(program);
        cmd.args(base)
            .args(["--profile", TUNNEL_PROFILE, "up", "-d", TUNNEL_SERVICE])
            .current_dir(project_dir)
            .envs(env);

        let output = run_bounded(&mut cmd, self.timeout, "compose up tailscale")
            .await
            .map_err(|e| OpsError::Orchestration(e.to_string()))?;
        if !output.success() {
            tracing::error!(error = %output.diagnostic(), "Tunnel bring-up failed");
            return Err(OpsError::Orchestration(format!(
                "Tunnel apply failed: {}",
                output.diagnostic()
            )));
        }
        tracing::info!(dir = %project_dir.display(), "Tunnel service started");
        Ok(())
    }
}
