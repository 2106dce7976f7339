//! Admin-facing update, rollback, and settings flows.
//!
//! Each mutating flow follows the same sequence: load config, ensure the
//! working copy, sync or check out, render the worker's env file, spawn the
//! worker, record one audit entry. Audit entries are written through the
//! caller's [`AuditSink`]; the caller owns the transaction and commits.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::json;
use znas_core::audit::{actions, targets};
use znas_core::runtime_env::TunnelConfig;
use znas_core::types::Timestamp;
use znas_core::version::{
    clamp_limit, has_drift, normalize_branch, tracking_ref, validate_ref, CommitInfo,
    VersionSnapshot,
};

use crate::audit::{AuditEntry, AuditSink, Operator};
use crate::compose::ComposeClient;
use crate::config::{OpsConfig, RunnerKind, COMPOSE_PROJECT_NAME};
use crate::error::{OpsError, OpsResult};
use crate::git::GitClient;
use crate::locks::WorkingCopyLocks;
use crate::repo::{RepoTracker, ResolveStrategy, WorkingCopy};
use crate::store::{RepoConfig, RepoConfigStore, RuntimeConfigStore};
use crate::task::{
    DockerLauncher, ProcessLauncher, TaskHandle, TaskKind, TaskRequest, TaskRunner,
    WorkerLauncher,
};

/// Update script, relative to the working copy.
pub const UPDATE_SCRIPT: &str = "scripts/nas_update.sh";

/// Rollback script, relative to the working copy. Takes the ref as its only argument.
pub const ROLLBACK_SCRIPT: &str = "scripts/nas_rollback.sh";

/// Default number of history rows.
pub const DEFAULT_HISTORY_LIMIT: i64 = 30;

/// Default number of tags.
pub const DEFAULT_TAGS_LIMIT: i64 = 50;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Drift report for the status screen.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateStatus {
    pub enabled: bool,
    pub initialized: bool,
    pub repo_url: String,
    pub branch: String,
    pub current_branch: Option<String>,
    pub current_commit: Option<String>,
    pub remote_commit: Option<String>,
    pub has_update: bool,
    /// Local HEAD metadata.
    pub local: Option<CommitInfo>,
    /// Remote head metadata. Absent when the remote commit is not present
    /// locally (the `ls-remote` fallback does not download objects).
    pub remote: Option<CommitInfo>,
    pub strategy: Option<ResolveStrategy>,
    pub fetch_error: Option<String>,
    pub message: String,
}

impl UpdateStatus {
    fn disabled() -> Self {
        Self {
            enabled: false,
            initialized: false,
            repo_url: String::new(),
            branch: String::new(),
            current_branch: None,
            current_commit: None,
            remote_commit: None,
            has_update: false,
            local: None,
            remote: None,
            strategy: None,
            fetch_error: None,
            message: "Web update disabled by server config".into(),
        }
    }

    fn uninitialized(config: &RepoConfig) -> Self {
        Self {
            enabled: true,
            repo_url: config.repo_url.clone(),
            branch: config.branch.clone(),
            message: "Working copy is not initialized".into(),
            ..Self::disabled()
        }
    }
}

/// Response of a flow that spawned a worker.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStarted {
    #[serde(flatten)]
    pub handle: TaskHandle,
    pub message: String,
}

/// Repository settings plus working-copy state.
#[derive(Debug, Clone, Serialize)]
pub struct RepoConfigView {
    pub repo_url: String,
    pub branch: String,
    pub repo_path: PathBuf,
    pub initialized: bool,
}

/// Result of saving repository settings.
#[derive(Debug, Clone, Serialize)]
pub struct RepoConfigSaved {
    pub repo_url: String,
    pub branch: String,
    pub initialized: bool,
}

/// Whether a tunnel config change was only saved or also brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelApplyOutcome {
    Saved,
    Applied,
}

impl TunnelApplyOutcome {
    fn as_str(self) -> &'static str {
        match self {
            TunnelApplyOutcome::Saved => "saved",
            TunnelApplyOutcome::Applied => "applied",
        }
    }
}

/// Checked-out version with the configured source.
#[derive(Debug, Clone, Serialize)]
pub struct VersionState {
    pub repo_url: String,
    #[serde(flatten)]
    pub snapshot: VersionSnapshot,
    pub checked_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Entry point for every admin system operation.
pub struct OpsService {
    config: OpsConfig,
    repo: RepoTracker,
    repo_config: RepoConfigStore,
    runtime_env: RuntimeConfigStore,
    tasks: TaskRunner,
    compose: ComposeClient,
    locks: WorkingCopyLocks,
}

impl OpsService {
    /// Build the service with the worker engine selected in `config`.
    pub fn new(config: OpsConfig) -> Self {
        let launcher: Arc<dyn WorkerLauncher> = match config.runner.kind {
            RunnerKind::Process => Arc::new(ProcessLauncher),
            RunnerKind::Docker => Arc::new(DockerLauncher::new(
                config.runner.docker_image.clone(),
                config.runner.self_container.clone(),
                config.timeouts.spawn,
            )),
        };
        Self::with_parts(config, GitClient::default(), launcher)
    }

    /// Build the service with an explicit git client and worker engine.
    pub fn with_parts(config: OpsConfig, git: GitClient, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self {
            repo: RepoTracker::new(git, config.timeouts),
            repo_config: RepoConfigStore::new(
                config.repo_config_path(),
                config.default_repo_url.clone(),
                config.default_branch.clone(),
            ),
            runtime_env: RuntimeConfigStore::new(
                config.runtime_env_path(),
                config.ops_dir.clone(),
                config.runtime_defaults.clone(),
            ),
            tasks: TaskRunner::new(config.ops_dir.clone(), launcher),
            compose: ComposeClient::new(config.timeouts.compose),
            locks: WorkingCopyLocks::default(),
            config,
        }
    }

    pub fn config(&self) -> &OpsConfig {
        &self.config
    }

    pub fn repo(&self) -> &RepoTracker {
        &self.repo
    }

    pub fn locks(&self) -> &WorkingCopyLocks {
        &self.locks
    }

    // -- tunnel ------------------------------------------------------------

    pub async fn tunnel_config(&self) -> TunnelConfig {
        TunnelConfig::from_env_map(&self.runtime_env.read().await)
    }

    /// Persist tunnel settings and optionally bring the sidecar up.
    ///
    /// With `apply`, the working-copy guard is taken before anything is
    /// saved. Once the settings are saved an audit entry is always written,
    /// including when bringing the sidecar up fails.
    pub async fn set_tunnel_config(
        &self,
        operator: &Operator,
        payload: &TunnelConfig,
        apply: bool,
        audit: &mut dyn AuditSink,
    ) -> OpsResult<TunnelApplyOutcome> {
        let path = self.config.repo_path();
        let _guard = if apply {
            Some(self.locks.try_acquire(&path)?)
        } else {
            None
        };

        self.runtime_env.write(&payload.to_env_pairs()).await?;

        let result = if apply {
            self.bring_up_tunnel(&path)
                .await
                .map(|()| TunnelApplyOutcome::Applied)
        } else {
            Ok(TunnelApplyOutcome::Saved)
        };

        let (label, error) = match &result {
            Ok(outcome) => (outcome.as_str(), None),
            Err(e) => ("apply failed", Some(e.to_string())),
        };
        audit
            .record(AuditEntry::new(
                operator,
                actions::UPDATE_TUNNEL_CONFIG,
                targets::TUNNEL,
                format!("Update tunnel config ({label})"),
                json!({
                    "applied": matches!(result, Ok(TunnelApplyOutcome::Applied)),
                    "hostname": payload.hostname,
                    "error": error,
                }),
            ))
            .await?;
        result
    }

    /// Caller holds the working-copy guard.
    async fn bring_up_tunnel(&self, path: &Path) -> OpsResult<()> {
        let repo_config = self.repo_config.load().await;
        let wc = self
            .repo
            .ensure_initialized(path, &repo_config.repo_url, &repo_config.branch)
            .await?;
        let env = self.prepare_worker_env(&wc, &repo_config).await?;
        self.compose.up_tunnel(wc.path(), &env).await
    }

    // -- repo config -------------------------------------------------------

    pub async fn repo_config(&self) -> RepoConfigView {
        let config = self.repo_config.load().await;
        let repo_path = self.config.repo_path();
        RepoConfigView {
            repo_url: config.repo_url,
            branch: config.branch,
            initialized: RepoTracker::is_initialized(&repo_path),
            repo_path,
        }
    }

    /// Save the update source, optionally cloning and fetching right away.
    pub async fn set_repo_config(
        &self,
        operator: &Operator,
        repo_url: &str,
        branch: &str,
        initialize: bool,
        audit: &mut dyn AuditSink,
    ) -> OpsResult<RepoConfigSaved> {
        let branch = validate_ref(&normalize_branch(branch))?;
        let config = RepoConfig {
            repo_url: repo_url.trim().to_string(),
            branch,
        };

        // Initialize against the new source before saving it, so a busy or
        // failed clone leaves the stored config untouched.
        let path = self.config.repo_path();
        let _guard = if initialize {
            Some(self.locks.try_acquire(&path)?)
        } else {
            None
        };
        if initialize {
            let wc = self
                .repo
                .ensure_initialized(&path, &config.repo_url, &config.branch)
                .await?;
            if let Err(e) = self.repo.fetch(&wc, &config.branch).await {
                tracing::warn!(branch = %config.branch, error = %e, "Initial fetch failed");
            }
        }
        self.repo_config.save(&config).await?;

        audit
            .record(AuditEntry::new(
                operator,
                actions::SET_REPO_CONFIG,
                targets::SYSTEM,
                "Update repository config",
                json!({
                    "repo_url": config.repo_url,
                    "branch": config.branch,
                    "initialized": initialize,
                }),
            ))
            .await?;

        Ok(RepoConfigSaved {
            repo_url: config.repo_url,
            branch: config.branch,
            initialized: initialize,
        })
    }

    // -- update ------------------------------------------------------------

    /// Compare the local HEAD with the remote tracking branch.
    ///
    /// Never clones: an uninitialized working copy is reported as such.
    pub async fn update_status(&self) -> OpsResult<UpdateStatus> {
        if !self.config.enable_web_ops {
            return Ok(UpdateStatus::disabled());
        }

        let config = self.repo_config.load().await;
        let Some(wc) = self.repo.open(&self.config.repo_path()).await else {
            return Ok(UpdateStatus::uninitialized(&config));
        };

        let local = self.repo.current_state(&wc).await?;
        let resolution = self.repo.resolve_remote(&wc, &config.branch).await?;
        let remote = self.repo.commit_info(&wc, &resolution.commit).await.ok();
        let has_update = has_drift(&local.commit, &resolution.commit);

        tracing::debug!(
            local = %local.short_commit,
            remote = %resolution.commit,
            strategy = ?resolution.strategy,
            has_update,
            "Update status"
        );

        Ok(UpdateStatus {
            enabled: true,
            initialized: true,
            repo_url: config.repo_url,
            branch: config.branch,
            current_branch: Some(local.branch.clone()),
            current_commit: Some(local.commit.clone()),
            remote_commit: Some(resolution.commit),
            has_update,
            local: Some(CommitInfo {
                commit: local.commit,
                short_commit: local.short_commit,
                committed_at: local.committed_at,
                subject: local.subject,
            }),
            remote,
            strategy: Some(resolution.strategy),
            fetch_error: resolution.fetch_error,
            message: if has_update {
                "A new version is available".into()
            } else {
                "Already up to date".into()
            },
        })
    }

    /// Sync the working copy to the tracking branch and start the update worker.
    pub async fn apply_update(
        &self,
        operator: &Operator,
        audit: &mut dyn AuditSink,
    ) -> OpsResult<TaskStarted> {
        if !self.config.enable_web_ops {
            return Err(OpsError::FeatureDisabled);
        }

        let path = self.config.repo_path();
        let _guard = self.locks.try_acquire(&path)?;
        let config = self.repo_config.load().await;
        let wc = self
            .repo
            .ensure_initialized(&path, &config.repo_url, &config.branch)
            .await?;
        self.repo.force_sync(&wc, &config.branch).await?;
        require_script(&wc, UPDATE_SCRIPT)?;

        let env = self.prepare_worker_env(&wc, &config).await?;
        let handle = self
            .tasks
            .spawn(TaskRequest {
                kind: TaskKind::Update,
                program: "bash".into(),
                args: vec![UPDATE_SCRIPT.into()],
                env,
                working_dir: wc.path().to_path_buf(),
                log_filename: TaskKind::Update.log_filename().into(),
            })
            .await?;

        audit
            .record(AuditEntry::new(
                operator,
                actions::APPLY_UPDATE,
                targets::SYSTEM,
                "Start web update task",
                json!({
                    "task_id": handle.task_id,
                    "pid": handle.pid,
                    "branch": config.branch,
                }),
            ))
            .await?;

        Ok(TaskStarted {
            handle,
            message: "Update task started; refresh later to confirm the version".into(),
        })
    }

    // -- version -----------------------------------------------------------

    pub async fn version_state(&self) -> OpsResult<VersionState> {
        let (config, wc) = self.working_copy().await?;
        let snapshot = self.repo.current_state(&wc).await?;
        Ok(VersionState {
            repo_url: config.repo_url,
            snapshot,
            checked_at: chrono::Utc::now(),
        })
    }

    /// Recent commits, `limit` clamped to 1..=200 (default 30).
    pub async fn version_history(&self, limit: Option<i64>) -> OpsResult<Vec<CommitInfo>> {
        let (_, wc) = self.working_copy().await?;
        self.repo
            .history(&wc, clamp_limit(limit, DEFAULT_HISTORY_LIMIT))
            .await
    }

    /// Tags newest first, `limit` clamped to 1..=200 (default 50).
    pub async fn version_tags(&self, limit: Option<i64>) -> OpsResult<Vec<String>> {
        let (_, wc) = self.working_copy().await?;
        self.repo
            .tags(&wc, clamp_limit(limit, DEFAULT_TAGS_LIMIT))
            .await
    }

    /// Check out `raw_ref` and start the rollback worker with it.
    ///
    /// The ref is validated before any file or process is touched.
    pub async fn rollback(
        &self,
        operator: &Operator,
        raw_ref: &str,
        audit: &mut dyn AuditSink,
    ) -> OpsResult<TaskStarted> {
        let git_ref = validate_ref(raw_ref)?;
        if git_ref.starts_with('-') {
            return Err(OpsError::Validation(format!(
                "Ref must not start with '-': {git_ref}"
            )));
        }
        self.run_rollback(operator, git_ref, false, audit).await
    }

    /// Roll back to the head of the tracking branch, resyncing first.
    pub async fn rollback_latest(
        &self,
        operator: &Operator,
        audit: &mut dyn AuditSink,
    ) -> OpsResult<TaskStarted> {
        let config = self.repo_config.load().await;
        let git_ref = validate_ref(&tracking_ref(&config.branch))?;
        self.run_rollback(operator, git_ref, true, audit).await
    }

    async fn run_rollback(
        &self,
        operator: &Operator,
        git_ref: String,
        resync: bool,
        audit: &mut dyn AuditSink,
    ) -> OpsResult<TaskStarted> {
        let path = self.config.repo_path();
        let _guard = self.locks.try_acquire(&path)?;
        let config = self.repo_config.load().await;
        let wc = self
            .repo
            .ensure_initialized(&path, &config.repo_url, &config.branch)
            .await?;
        if resync {
            self.repo.force_sync(&wc, &config.branch).await?;
        }
        self.repo.checkout_ref(&wc, &git_ref).await?;
        require_script(&wc, ROLLBACK_SCRIPT)?;

        let env = self.prepare_worker_env(&wc, &config).await?;
        let handle = self
            .tasks
            .spawn(TaskRequest {
                kind: TaskKind::Rollback,
                program: "bash".into(),
                args: vec![ROLLBACK_SCRIPT.into(), git_ref.clone()],
                env,
                working_dir: wc.path().to_path_buf(),
                log_filename: TaskKind::Rollback.log_filename().into(),
            })
            .await?;

        audit
            .record(AuditEntry::new(
                operator,
                actions::ROLLBACK_VERSION,
                git_ref.clone(),
                format!("Start rollback to {git_ref}"),
                json!({
                    "ref": git_ref,
                    "task_id": handle.task_id,
                    "pid": handle.pid,
                }),
            ))
            .await?;

        Ok(TaskStarted {
            handle,
            message: format!("Rollback to {git_ref} started; refresh later to check the status"),
        })
    }

    // -- helpers -----------------------------------------------------------

    /// Loaded repo config and an initialized working copy.
    ///
    /// An existing copy is read without the guard. A missing one is cloned
    /// only while holding it, so a read never races a mutating flow's clone.
    async fn working_copy(&self) -> OpsResult<(RepoConfig, WorkingCopy)> {
        let config = self.repo_config.load().await;
        let path = self.config.repo_path();
        if let Some(wc) = self.repo.open(&path).await {
            return Ok((config, wc));
        }

        let _guard = self.locks.try_acquire(&path)?;
        let wc = self
            .repo
            .ensure_initialized(&path, &config.repo_url, &config.branch)
            .await?;
        Ok((config, wc))
    }

    /// Render `<working copy>/.env` and return the worker's environment.
    async fn prepare_worker_env(
        &self,
        wc: &WorkingCopy,
        config: &RepoConfig,
    ) -> OpsResult<IndexMap<String, String>> {
        let extra = IndexMap::from([
            ("UPDATE_BRANCH".to_string(), config.branch.clone()),
            ("REPO_URL".to_string(), config.repo_url.clone()),
        ]);
        self.runtime_env
            .materialize_env_file(wc.path(), &extra)
            .await?;

        let mut env = self.runtime_env.read().await;
        env.extend(extra);
        env.insert(
            "PROJECT_ROOT".into(),
            wc.path().to_string_lossy().into_owned(),
        );
        env.insert(
            "OPS_DIR".into(),
            self.config.ops_dir.to_string_lossy().into_owned(),
        );
        env.insert("COMPOSE_PROJECT_NAME".into(), COMPOSE_PROJECT_NAME.into());
        Ok(env)
    }
}

fn require_script(wc: &WorkingCopy, relative: &str) -> OpsResult<()> {
    if wc.path().join(relative).is_file() {
        Ok(())
    } else {
        Err(OpsError::NotFound(format!("Script not found: {relative}")))
    }
}
