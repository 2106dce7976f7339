//! The deployed working copy: clone, inspect, fetch, and resolve the remote head.

use std::path::{Path, PathBuf};

use serde::Serialize;
use znas_core::version::{
    parse_log_line, parse_log_rows, parse_ls_remote_head, parse_tag_list, tracking_ref,
    CommitInfo, VersionSnapshot, LOG_FORMAT, REMOTE_NAME,
};

use crate::config::OpsTimeouts;
use crate::error::{OpsError, OpsResult};
use crate::git::GitClient;

/// An initialized local clone. Only [`RepoTracker`] hands these out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCopy {
    path: PathBuf,
}

impl WorkingCopy {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// How a remote head commit was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveStrategy {
    /// Fetch the branch, then read `origin/<branch>`.
    TrackingRef,
    /// Ask the remote directly with `git ls-remote`.
    ListRemote,
}

/// Result of [`RepoTracker::resolve_remote`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteResolution {
    pub commit: String,
    pub strategy: ResolveStrategy,
    /// Why the primary strategy was skipped, if it was.
    pub fetch_error: Option<String>,
}

/// Runs every git operation against the working copy with bounded timeouts.
#[derive(Debug, Clone)]
pub struct RepoTracker {
    git: GitClient,
    timeouts: OpsTimeouts,
}

impl RepoTracker {
    pub fn new(git: GitClient, timeouts: OpsTimeouts) -> Self {
        Self { git, timeouts }
    }

    /// A `.git` entry marks the directory as initialized.
    pub fn is_initialized(path: &Path) -> bool {
        path.join(".git").exists()
    }

    /// Open an existing working copy without touching the network.
    pub async fn open(&self, path: &Path) -> Option<WorkingCopy> {
        if !Self::is_initialized(path) {
            return None;
        }
        self.ensure_trusted(path).await;
        Some(WorkingCopy {
            path: path.to_path_buf(),
        })
    }

    /// Register `path` in the global `safe.directory` list unless already present.
    ///
    /// The working copy is usually owned by a different uid than the server
    /// process (shared volume), and git refuses to operate on it otherwise.
    /// Failure here is logged and ignored: later commands report their own errors.
    pub async fn ensure_trusted(&self, path: &Path) {
        let wanted = path.to_string_lossy().into_owned();
        let listed = self
            .git
            .run(
                None,
                &["config", "--global", "--get-all", "safe.directory"],
                self.timeouts.git_read,
            )
            .await;

        match listed {
            Ok(out) if out.stdout.lines().any(|l| l.trim() == wanted || l.trim() == "*") => {}
            Ok(_) => {
                let added = self
                    .git
                    .run_checked(
                        None,
                        &["config", "--global", "--add", "safe.directory", &wanted],
                        self.timeouts.git_read,
                    )
                    .await;
                match added {
                    Ok(_) => tracing::debug!(repo = %wanted, "Registered safe.directory"),
                    Err(e) => tracing::warn!(repo = %wanted, error = %e, "Could not register safe.directory"),
                }
            }
            Err(e) => tracing::warn!(repo = %wanted, error = %e, "Could not read safe.directory"),
        }
    }

    /// Clone `repo_url` into `path` unless it is already a working copy.
    ///
    /// An initialized copy is returned as-is with no network call.
    pub async fn ensure_initialized(
        &self,
        path: &Path,
        repo_url: &str,
        branch: &str,
    ) -> OpsResult<WorkingCopy> {
        if let Some(wc) = self.open(path).await {
            return Ok(wc);
        }

        let repo_url = repo_url.trim();
        if repo_url.is_empty() {
            return Err(OpsError::Configuration(
                "Repository URL is not configured".into(),
            ));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tracing::info!(repo = %path.display(), branch, "Cloning working copy");
        let target = path.to_string_lossy();
        let output = self
            .git
            .run(
                None,
                &[
                    "clone",
                    "--branch",
                    branch,
                    "--single-branch",
                    "--",
                    repo_url,
                    &target,
                ],
                self.timeouts.git_clone,
            )
            .await?;
        if !output.success() {
            tracing::error!(repo = %path.display(), error = %output.diagnostic(), "Clone failed");
            return Err(OpsError::Initialization(output.diagnostic()));
        }

        self.ensure_trusted(path).await;
        Ok(WorkingCopy {
            path: path.to_path_buf(),
        })
    }

    /// Read the checked-out version. A missing exact tag is not an error.
    pub async fn current_state(&self, wc: &WorkingCopy) -> OpsResult<VersionSnapshot> {
        let branch = self
            .git
            .run_checked(
                Some(wc.path()),
                &["rev-parse", "--abbrev-ref", "HEAD"],
                self.timeouts.git_read,
            )
            .await?
            .stdout_trimmed()
            .to_string();

        let head = self.commit_info(wc, "HEAD").await?;

        let tag = self
            .git
            .run(
                Some(wc.path()),
                &["describe", "--tags", "--exact-match", "HEAD"],
                self.timeouts.git_read,
            )
            .await?;
        let tag = (tag.success() && !tag.stdout_trimmed().is_empty())
            .then(|| tag.stdout_trimmed().to_string());

        Ok(VersionSnapshot {
            commit: head.commit,
            short_commit: head.short_commit,
            branch,
            tag,
            subject: head.subject,
            committed_at: head.committed_at,
        })
    }

    /// Metadata for one revision.
    pub async fn commit_info(&self, wc: &WorkingCopy, rev: &str) -> OpsResult<CommitInfo> {
        let output = self
            .git
            .run_checked(
                Some(wc.path()),
                &["log", "-1", LOG_FORMAT, rev, "--"],
                self.timeouts.git_read,
            )
            .await?;
        parse_log_line(output.stdout_trimmed()).ok_or_else(|| OpsError::Git {
            command: format!("git log -1 {rev}"),
            output: "unparseable log output".into(),
        })
    }

    /// Fetch `branch` into its remote-tracking ref.
    pub async fn fetch(&self, wc: &WorkingCopy, branch: &str) -> OpsResult<()> {
        let refspec = format!("+refs/heads/{branch}:refs/remotes/{REMOTE_NAME}/{branch}");
        self.git
            .run_checked(
                Some(wc.path()),
                &["fetch", REMOTE_NAME, &refspec],
                self.timeouts.git_fetch,
            )
            .await?;
        Ok(())
    }

    /// Commit currently recorded in `origin/<branch>`.
    pub async fn tracking_ref_head(&self, wc: &WorkingCopy, branch: &str) -> OpsResult<String> {
        let rev = format!("{}^{{commit}}", tracking_ref(branch));
        let output = self
            .git
            .run_checked(
                Some(wc.path()),
                &["rev-parse", "--verify", "--quiet", &rev],
                self.timeouts.git_read,
            )
            .await?;
        Ok(output.stdout_trimmed().to_string())
    }

    /// Commit at `refs/heads/<branch>` on the remote, without fetching objects.
    pub async fn list_remote_head(&self, wc: &WorkingCopy, branch: &str) -> OpsResult<String> {
        let head = format!("refs/heads/{branch}");
        let output = self
            .git
            .run_checked(
                Some(wc.path()),
                &["ls-remote", REMOTE_NAME, &head],
                self.timeouts.git_fetch,
            )
            .await?;
        parse_ls_remote_head(&output.stdout)
            .ok_or_else(|| OpsError::Fetch(format!("Branch '{branch}' not found on remote")))
    }

    /// Resolve the remote head with one specific strategy.
    pub async fn resolve_with(
        &self,
        wc: &WorkingCopy,
        branch: &str,
        strategy: ResolveStrategy,
    ) -> OpsResult<String> {
        match strategy {
            ResolveStrategy::TrackingRef => {
                self.fetch(wc, branch).await?;
                self.tracking_ref_head(wc, branch).await
            }
            ResolveStrategy::ListRemote => self.list_remote_head(wc, branch).await,
        }
    }

    /// Resolve the remote head: fetch and read the tracking ref, falling back
    /// to `ls-remote` when the fetch fails or the ref cannot be read.
    ///
    /// Only fails when both strategies fail.
    pub async fn resolve_remote(
        &self,
        wc: &WorkingCopy,
        branch: &str,
    ) -> OpsResult<RemoteResolution> {
        let primary_error = match self.resolve_with(wc, branch, ResolveStrategy::TrackingRef).await
        {
            Ok(commit) => {
                return Ok(RemoteResolution {
                    commit,
                    strategy: ResolveStrategy::TrackingRef,
                    fetch_error: None,
                })
            }
            Err(e) => e.to_string(),
        };
        tracing::warn!(
            repo = %wc.path().display(),
            branch,
            error = %primary_error,
            "Tracking ref unavailable, falling back to ls-remote"
        );

        match self
            .resolve_with(wc, branch, ResolveStrategy::ListRemote)
            .await
        {
            Ok(commit) => Ok(RemoteResolution {
                commit,
                strategy: ResolveStrategy::ListRemote,
                fetch_error: Some(primary_error),
            }),
            Err(e) => Err(OpsError::Fetch(format!("{primary_error}; fallback: {e}"))),
        }
    }

    /// Fetch `branch` and hard-reset the working copy onto `origin/<branch>`,
    /// leaving HEAD attached to a local `<branch>`.
    pub async fn force_sync(&self, wc: &WorkingCopy, branch: &str) -> OpsResult<()> {
        self.fetch(wc, branch).await?;
        let upstream = tracking_ref(branch);
        self.git
            .run_checked(
                Some(wc.path()),
                &["checkout", "--force", "-B", branch, &upstream, "--"],
                self.timeouts.git_sync,
            )
            .await?;
        tracing::info!(repo = %wc.path().display(), branch, "Working copy synced");
        Ok(())
    }

    /// Fetch all refs and tags, then check out `git_ref` (detached HEAD allowed).
    ///
    /// `git_ref` must already have passed ref validation. A failed fetch is
    /// logged; the checkout still runs against whatever is available locally.
    pub async fn checkout_ref(&self, wc: &WorkingCopy, git_ref: &str) -> OpsResult<()> {
        if git_ref.starts_with('-') {
            return Err(OpsError::Validation(format!(
                "Ref must not start with '-': {git_ref}"
            )));
        }

        if let Err(e) = self
            .git
            .run_checked(
                Some(wc.path()),
                &["fetch", "--all", "--tags", "--force"],
                self.timeouts.git_fetch,
            )
            .await
        {
            tracing::warn!(repo = %wc.path().display(), error = %e, "Fetch before checkout failed");
        }

        self.git
            .run_checked(
                Some(wc.path()),
                &["checkout", "--force", git_ref, "--"],
                self.timeouts.git_sync,
            )
            .await?;
        tracing::info!(repo = %wc.path().display(), git_ref, "Checked out ref");
        Ok(())
    }

    /// The most recent `limit` commits reachable from HEAD.
    pub async fn history(&self, wc: &WorkingCopy, limit: usize) -> OpsResult<Vec<CommitInfo>> {
        let count = format!("-n{limit}");
        let output = self
            .git
            .run_checked(
                Some(wc.path()),
                &["log", &count, LOG_FORMAT],
                self.timeouts.git_read,
            )
            .await?;
        Ok(parse_log_rows(&output.stdout))
    }

    /// Tag names, newest first, at most `limit`.
    pub async fn tags(&self, wc: &WorkingCopy, limit: usize) -> OpsResult<Vec<String>> {
        let output = self
            .git
            .run_checked(
                Some(wc.path()),
                &["tag", "--sort=-creatordate"],
                self.timeouts.git_read,
            )
            .await?;
        Ok(parse_tag_list(&output.stdout, limit))
    }
}
