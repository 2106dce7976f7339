//! Shared fixtures for ops integration tests: throwaway git remotes, a
//! recording worker engine, and an in-memory audit sink.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use znas_ops::audit::{AuditEntry, AuditSink, Operator};
use znas_ops::config::OpsConfig;
use znas_ops::git::GitClient;
use znas_ops::task::{PreparedTask, WorkerLauncher};
use znas_ops::{OpsError, OpsResult, OpsService};

pub const ROLLBACK_SCRIPT_BODY: &str = "#!/usr/bin/env bash\necho \"rollback to $1\"\n";
pub const UPDATE_SCRIPT_BODY: &str = "#!/usr/bin/env bash\necho update\n";

/// A bare "remote" plus a seed clone used to push commits to it.
pub struct GitFixture {
    pub tmp: TempDir,
    pub upstream: PathBuf,
    pub seed: PathBuf,
    pub gitconfig: PathBuf,
}

impl GitFixture {
    /// Remote with one commit on `main` carrying both scripts.
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let upstream = tmp.path().join("upstream.git");
        let seed = tmp.path().join("seed");
        let gitconfig = tmp.path().join("gitconfig");
        std::fs::write(&gitconfig, "").unwrap();

        let fixture = Self {
            tmp,
            upstream,
            seed,
            gitconfig,
        };

        fixture.git(None, &["init", "--bare", "--quiet", path_str(&fixture.upstream)]);
        fixture.git(Some(&fixture.upstream), &["symbolic-ref", "HEAD", "refs/heads/main"]);
        fixture.git(None, &["init", "--quiet", path_str(&fixture.seed)]);
        fixture.git(Some(&fixture.seed), &["checkout", "--quiet", "-b", "main"]);
        fixture.git(
            Some(&fixture.seed),
            &["remote", "add", "origin", path_str(&fixture.upstream)],
        );

        fixture.write_file("scripts/nas_update.sh", UPDATE_SCRIPT_BODY);
        fixture.write_file("scripts/nas_rollback.sh", ROLLBACK_SCRIPT_BODY);
        fixture.commit("initial release");
        fixture.push();
        fixture
    }

    /// Run git with an isolated global config and fixed identity.
    pub fn git(&self, cwd: Option<&Path>, args: &[&str]) -> String {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .env("GIT_CONFIG_GLOBAL", &self.gitconfig)
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("GIT_AUTHOR_NAME", "Ops Test")
            .env("GIT_AUTHOR_EMAIL", "ops@example.com")
            .env("GIT_COMMITTER_NAME", "Ops Test")
            .env("GIT_COMMITTER_EMAIL", "ops@example.com");
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let out = cmd.output().expect("git runs");
        assert!(
            out.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    pub fn write_file(&self, relative: &str, content: &str) {
        let path = self.seed.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    /// Commit everything in the seed and return the new HEAD.
    pub fn commit(&self, message: &str) -> String {
        self.git(Some(&self.seed), &["add", "-A"]);
        self.git(Some(&self.seed), &["commit", "--quiet", "--allow-empty", "-m", message]);
        self.git(Some(&self.seed), &["rev-parse", "HEAD"])
    }

    pub fn tag(&self, name: &str) {
        self.git(Some(&self.seed), &["tag", name]);
    }

    pub fn push(&self) {
        self.git(Some(&self.seed), &["push", "--quiet", "--tags", "origin", "main"]);
    }

    /// Commit and push a new change; returns the new remote head.
    pub fn advance(&self, message: &str) -> String {
        self.write_file("CHANGELOG", message);
        let head = self.commit(message);
        self.push();
        head
    }

    pub fn ops_dir(&self) -> PathBuf {
        self.tmp.path().join("ops")
    }

    pub fn repo_path(&self) -> PathBuf {
        self.ops_dir().join("repo")
    }

    pub fn seed_head(&self) -> String {
        self.git(Some(&self.seed), &["rev-parse", "HEAD"])
    }

    /// HEAD of the server's working copy.
    pub fn working_head(&self) -> String {
        self.git(Some(&self.repo_path()), &["rev-parse", "HEAD"])
    }

    /// Git client that never touches the real global config.
    pub fn git_client(&self) -> GitClient {
        GitClient::default()
            .with_env("GIT_CONFIG_GLOBAL", path_str(&self.gitconfig))
            .with_env("GIT_CONFIG_NOSYSTEM", "1")
    }

    /// Config rooted in this fixture, with the fixture remote as default source.
    pub fn config(&self) -> OpsConfig {
        let mut config = OpsConfig::with_ops_dir(self.ops_dir());
        config.default_repo_url = path_str(&self.upstream).to_string();
        config
    }

    pub fn service(&self, launcher: Arc<dyn WorkerLauncher>) -> OpsService {
        self.service_with(self.config(), launcher)
    }

    pub fn service_with(&self, config: OpsConfig, launcher: Arc<dyn WorkerLauncher>) -> OpsService {
        OpsService::with_parts(config, self.git_client(), launcher)
    }
}

pub fn path_str(path: &Path) -> &str {
    path.to_str().expect("utf-8 temp path")
}

pub fn admin() -> Operator {
    Operator {
        user_id: 1,
        role: "admin".into(),
    }
}

// ---------------------------------------------------------------------------
// Worker engines
// ---------------------------------------------------------------------------

/// Records every launch instead of running anything.
#[derive(Default)]
pub struct RecordingLauncher {
    pub launched: Mutex<Vec<PreparedTask>>,
}

impl RecordingLauncher {
    pub fn tasks(&self) -> Vec<PreparedTask> {
        self.launched.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerLauncher for RecordingLauncher {
    fn engine(&self) -> &'static str {
        "recording"
    }

    async fn launch(&self, task: &PreparedTask) -> OpsResult<Option<u32>> {
        self.launched.lock().unwrap().push(task.clone());
        Ok(Some(4242))
    }
}

/// Always fails to start.
pub struct FailingLauncher;

#[async_trait]
impl WorkerLauncher for FailingLauncher {
    fn engine(&self) -> &'static str {
        "failing"
    }

    async fn launch(&self, _task: &PreparedTask) -> OpsResult<Option<u32>> {
        Err(OpsError::Orchestration("engine unavailable".into()))
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryAuditSink {
    pub entries: Vec<AuditEntry>,
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&mut self, entry: AuditEntry) -> OpsResult<()> {
        self.entries.push(entry);
        Ok(())
    }
}
