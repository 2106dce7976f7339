use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use znas_core::runtime_env::capture_defaults;
use znas_core::version::{normalize_branch, DEFAULT_BRANCH};

/// Working-copy location that means "use `<ops_dir>/repo` instead".
const LEGACY_PROJECT_ROOT: &str = "/workspace";

/// Compose project name exported to every worker.
pub const COMPOSE_PROJECT_NAME: &str = "znas";

/// Which engine launches detached workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerKind {
    /// A local child process in its own process group.
    Process,
    /// A throwaway container sharing this server's volumes.
    Docker,
}

/// Detached worker settings.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub kind: RunnerKind,
    /// Image used by the docker engine.
    pub docker_image: String,
    /// Container whose volumes the worker inherits (`--volumes-from`).
    pub self_container: Option<String>,
}

/// Timeouts for every class of external command.
#[derive(Debug, Clone, Copy)]
pub struct OpsTimeouts {
    pub git_read: Duration,
    pub git_fetch: Duration,
    pub git_clone: Duration,
    pub git_sync: Duration,
    pub spawn: Duration,
    pub compose: Duration,
}

impl Default for OpsTimeouts {
    fn default() -> Self {
        Self {
            git_read: Duration::from_secs(10),
            git_fetch: Duration::from_secs(20),
            git_clone: Duration::from_secs(35),
            git_sync: Duration::from_secs(20),
            spawn: Duration::from_secs(35),
            compose: Duration::from_secs(35),
        }
    }
}

/// Orchestrator configuration, built once at startup and passed down.
#[derive(Debug, Clone)]
pub struct OpsConfig {
    /// Feature flag for apply-update (`ENABLE_WEB_OPS`).
    pub enable_web_ops: bool,
    /// Directory holding persisted documents and task logs.
    pub ops_dir: PathBuf,
    /// Explicit working-copy location (`PROJECT_ROOT`).
    pub project_root: Option<PathBuf>,
    /// Fallback repository URL when none is persisted (`REPO_URL`).
    pub default_repo_url: String,
    /// Fallback tracking branch when none is persisted (`UPDATE_BRANCH`).
    pub default_branch: String,
    /// Process-level defaults for the runtime environment allow-list.
    pub runtime_defaults: HashMap<String, String>,
    pub runner: RunnerConfig,
    pub timeouts: OpsTimeouts,
}

impl OpsConfig {
    /// Defaults rooted at `ops_dir`, with no process environment captured.
    pub fn with_ops_dir(ops_dir: impl Into<PathBuf>) -> Self {
        Self {
            enable_web_ops: true,
            ops_dir: ops_dir.into(),
            project_root: None,
            default_repo_url: String::new(),
            default_branch: DEFAULT_BRANCH.to_string(),
            runtime_defaults: HashMap::new(),
            runner: RunnerConfig {
                kind: RunnerKind::Process,
                docker_image: "docker:cli".to_string(),
                self_container: None,
            },
            timeouts: OpsTimeouts::default(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// | Env Var                      | Default          |
    /// |------------------------------|------------------|
    /// | `ENABLE_WEB_OPS`             | `true`           |
    /// | `OPS_DIR`                    | `/data/ops`      |
    /// | `PROJECT_ROOT`               | `<OPS_DIR>/repo` |
    /// | `REPO_URL`                   | (empty)          |
    /// | `UPDATE_BRANCH`              | `main`           |
    /// | `OPS_TASK_RUNNER`            | `process`        |
    /// | `OPS_WORKER_IMAGE`           | `docker:cli`     |
    /// | `OPS_SELF_CONTAINER`         | `$HOSTNAME`      |
    /// | `OPS_GIT_READ_TIMEOUT_SECS`  | `10`             |
    /// | `OPS_GIT_FETCH_TIMEOUT_SECS` | `20`             |
    /// | `OPS_GIT_CLONE_TIMEOUT_SECS` | `35`             |
    /// | `OPS_GIT_SYNC_TIMEOUT_SECS`  | `20`             |
    /// | `OPS_SPAWN_TIMEOUT_SECS`     | `35`             |
    /// | `OPS_COMPOSE_TIMEOUT_SECS`   | `35`             |
    ///
    /// # Panics
    ///
    /// Panics on malformed numeric values or an unknown `OPS_TASK_RUNNER`.
    pub fn from_env() -> Self {
        let ops_dir = env_or("OPS_DIR", "/data/ops");
        let mut config = Self::with_ops_dir(ops_dir);

        config.enable_web_ops = parse_bool(&env_or("ENABLE_WEB_OPS", "true"));
        config.project_root = std::env::var("PROJECT_ROOT")
            .ok()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        config.default_repo_url = env_or("REPO_URL", "").trim().to_string();
        config.default_branch = normalize_branch(&env_or("UPDATE_BRANCH", DEFAULT_BRANCH));
        config.runtime_defaults = capture_defaults(std::env::vars());

        config.runner.kind = match env_or("OPS_TASK_RUNNER", "process").trim() {
            "process" => RunnerKind::Process,
            "docker" => RunnerKind::Docker,
            other => panic!("OPS_TASK_RUNNER must be 'process' or 'docker', got '{other}'"),
        };
        config.runner.docker_image = env_or("OPS_WORKER_IMAGE", "docker:cli");
        config.runner.self_container = std::env::var("OPS_SELF_CONTAINER")
            .or_else(|_| std::env::var("HOSTNAME"))
            .ok()
            .filter(|s| !s.trim().is_empty());

        let defaults = OpsTimeouts::default();
        config.timeouts = OpsTimeouts {
            git_read: secs_from_env("OPS_GIT_READ_TIMEOUT_SECS", defaults.git_read),
            git_fetch: secs_from_env("OPS_GIT_FETCH_TIMEOUT_SECS", defaults.git_fetch),
            git_clone: secs_from_env("OPS_GIT_CLONE_TIMEOUT_SECS", defaults.git_clone),
            git_sync: secs_from_env("OPS_GIT_SYNC_TIMEOUT_SECS", defaults.git_sync),
            spawn: secs_from_env("OPS_SPAWN_TIMEOUT_SECS", defaults.spawn),
            compose: secs_from_env("OPS_COMPOSE_TIMEOUT_SECS", defaults.compose),
        };

        config
    }

    /// Location of the working copy bound to this server.
    pub fn repo_path(&self) -> PathBuf {
        match &self.project_root {
            Some(root) if root != Path::new(LEGACY_PROJECT_ROOT) => root.clone(),
            _ => self.ops_dir.join("repo"),
        }
    }

    pub fn repo_config_path(&self) -> PathBuf {
        self.ops_dir.join("repo_config.json")
    }

    pub fn runtime_env_path(&self) -> PathBuf {
        self.ops_dir.join("runtime_env.json")
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn secs_from_env(key: &str, default: Duration) -> Duration {
    match std::env::var(key) {
        Ok(raw) => Duration::from_secs(
            raw.trim()
                .parse()
                .unwrap_or_else(|_| panic!("{key} must be a valid u64")),
        ),
        Err(_) => default,
    }
}
