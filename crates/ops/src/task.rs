//! Detached update/rollback workers.
//!
//! [`TaskRunner::spawn`] returns as soon as the worker has been accepted by
//! its engine. It never waits for completion: the worker outlives the
//! request and usually restarts this very server. Whatever happens after
//! the start is only visible in the task log.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{OpsError, OpsResult};
use crate::process::run_bounded;

/// Environment variable pointing the worker at its log file.
pub const TASK_LOG_ENV: &str = "OPS_TASK_LOG";

/// What a worker is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Update,
    Rollback,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Update => "update",
            TaskKind::Rollback => "rollback",
        }
    }

    /// Log file under `OPS_DIR` that this kind of task appends to.
    pub fn log_filename(self) -> &'static str {
        match self {
            TaskKind::Update => "update_web.log",
            TaskKind::Rollback => "rollback_web.log",
        }
    }
}

/// What to run.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub kind: TaskKind,
    pub program: String,
    pub args: Vec<String>,
    pub env: IndexMap<String, String>,
    pub working_dir: PathBuf,
    pub log_filename: String,
}

/// A request with its id and log location assigned, as seen by an engine.
#[derive(Debug, Clone)]
pub struct PreparedTask {
    pub task_id: String,
    pub kind: TaskKind,
    pub program: String,
    pub args: Vec<String>,
    pub env: IndexMap<String, String>,
    pub working_dir: PathBuf,
    pub log_path: PathBuf,
}

/// Handle to a started worker. `started` means accepted, not succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct TaskHandle {
    pub task_id: String,
    pub log_path: PathBuf,
    pub started: bool,
    /// OS process id, when the engine runs the worker as a local process.
    pub pid: Option<u32>,
    pub engine: &'static str,
}

/// An engine able to start a detached worker.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Short engine name reported in the handle.
    fn engine(&self) -> &'static str;

    /// Start the worker and return its pid if there is a local one.
    ///
    /// Must not wait for the worker to finish. Any failure to start is an
    /// [`OpsError::Orchestration`].
    async fn launch(&self, task: &PreparedTask) -> OpsResult<Option<u32>>;
}

// ---------------------------------------------------------------------------
// Process engine
// ---------------------------------------------------------------------------

/// Runs the worker as a local child in its own process group, so it
/// survives a restart of this server.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher;

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    fn engine(&self) -> &'static str {
        "process"
    }

    async fn launch(&self, task: &PreparedTask) -> OpsResult<Option<u32>> {
        let log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&task.log_path)
            .await
            .map_err(|e| OpsError::Orchestration(format!("Cannot open task log: {e}")))?
            .into_std()
            .await;
        let log_err = log
            .try_clone()
            .map_err(|e| OpsError::Orchestration(format!("Cannot open task log: {e}")))?;

        let mut cmd = Command::new(&task.program);
        cmd.args(&task.args)
            .current_dir(&task.working_dir)
            .envs(&task.env)
            .env(TASK_LOG_ENV, &task.log_path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| {
            OpsError::Orchestration(format!("Failed to spawn '{}': {e}", task.program))
        })?;
        Ok(child.id())
    }
}

// ---------------------------------------------------------------------------
// Docker engine
// ---------------------------------------------------------------------------

/// Runs the worker in a throwaway container that shares this server's volumes.
#[derive(Debug, Clone)]
pub struct DockerLauncher {
    docker_program: String,
    image: String,
    self_container: Option<String>,
    timeout: Duration,
}

impl DockerLauncher {
    pub fn new(image: String, self_container: Option<String>, timeout: Duration) -> Self {
        Self {
            docker_program: "docker".to_string(),
            image,
            self_container,
            timeout,
        }
    }

    /// `docker run` arguments for `task`.
    ///
    /// The program and its arguments follow the inline script positionally,
    /// so no value is ever interpreted by a shell.
    pub fn run_args(&self, task: &PreparedTask) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--rm".into(),
            "--name".into(),
            task.task_id.clone(),
        ];
        if let Some(container) = &self.self_container {
            args.push("--volumes-from".into());
            args.push(container.clone());
        }
        args.push("-w".into());
        args.push(task.working_dir.to_string_lossy().into_owned());
        for (key, value) in &task.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        args.push("-e".into());
        args.push(format!("{TASK_LOG_ENV}={}", task.log_path.to_string_lossy()));
        args.extend([
            "--entrypoint".into(),
            "sh".into(),
            self.image.clone(),
            "-c".into(),
            format!(r#"exec "$@" >>"${TASK_LOG_ENV}" 2>&1"#),
            "sh".into(),
            task.program.clone(),
        ]);
        args.extend(task.args.iter().cloned());
        args
    }
}

#[async_trait]
impl WorkerLauncher for DockerLauncher {
    fn engine(&self) -> &'static str {
        "docker"
    }

    async fn launch(&self, task: &PreparedTask) -> OpsResult<Option<u32>> {
        let mut cmd = Command::new(&self.docker_program);
        cmd.args(self.run_args(task));

        let output = run_bounded(&mut cmd, self.timeout, "docker run")
            .await
            .map_err(|e| OpsError::Orchestration(e.to_string()))?;
        if !output.success() {
            return Err(OpsError::Orchestration(output.diagnostic()));
        }
        tracing::debug!(
            task_id = %task.task_id,
            container = %output.stdout_trimmed(),
            "Worker container started"
        );
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Assigns ids and log files, then hands tasks to the configured engine.
#[derive(Clone)]
pub struct TaskRunner {
    ops_dir: PathBuf,
    launcher: Arc<dyn WorkerLauncher>,
}

impl TaskRunner {
    pub fn new(ops_dir: PathBuf, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self { ops_dir, launcher }
    }

    pub fn engine(&self) -> &'static str {
        self.launcher.engine()
    }

    /// Start a detached worker. Returns once the engine has accepted it.
    pub async fn spawn(&self, request: TaskRequest) -> OpsResult<TaskHandle> {
        let task_id = new_task_id(request.kind);
        tokio::fs::create_dir_all(&self.ops_dir).await?;
        let log_path = self.ops_dir.join(&request.log_filename);

        let header = format!(
            "=== {} {} task {} ===\n",
            chrono::Utc::now().to_rfc3339(),
            request.kind.as_str(),
            task_id
        );
        let mut log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await?;
        log.write_all(header.as_bytes()).await?;
        log.flush().await?;
        drop(log);

        let task = PreparedTask {
            task_id,
            kind: request.kind,
            program: request.program,
            args: request.args,
            env: request.env,
            working_dir: request.working_dir,
            log_path,
        };

        let pid = self.launcher.launch(&task).await.map_err(|e| {
            tracing::error!(task_id = %task.task_id, error = %e, "Worker failed to start");
            e
        })?;

        tracing::info!(
            task_id = %task.task_id,
            kind = task.kind.as_str(),
            engine = self.engine(),
            pid,
            log = %task.log_path.display(),
            "Worker started"
        );

        Ok(TaskHandle {
            task_id: task.task_id,
            log_path: task.log_path,
            started: true,
            pid,
            engine: self.engine(),
        })
    }
}

fn new_task_id(kind: TaskKind) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("znas-{}-{}", kind.as_str(), &id[..12])
}
