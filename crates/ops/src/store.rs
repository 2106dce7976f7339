//! Persisted operator settings under `OPS_DIR`.
//!
//! Two small JSON documents live here: `repo_config.json` (where to pull
//! from) and `runtime_env.json` (allow-listed environment overrides). A
//! missing or corrupt document reads as empty so a bad write never locks
//! the operator out of the admin screen.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use znas_core::runtime_env::{is_allowed_key, resolve, upsert_env_lines};
use znas_core::version::normalize_branch;

use crate::error::OpsResult;

/// Name of the environment file rendered into the working copy.
pub const ENV_FILE_NAME: &str = ".env";

// ---------------------------------------------------------------------------
// Repo config
// ---------------------------------------------------------------------------

/// Where updates are pulled from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub repo_url: String,
    pub branch: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoredRepoConfig {
    repo_url: Option<String>,
    branch: Option<String>,
}

/// Reads and writes `repo_config.json`, falling back to process defaults.
#[derive(Debug, Clone)]
pub struct RepoConfigStore {
    path: PathBuf,
    default_repo_url: String,
    default_branch: String,
}

impl RepoConfigStore {
    pub fn new(path: PathBuf, default_repo_url: String, default_branch: String) -> Self {
        Self {
            path,
            default_repo_url,
            default_branch,
        }
    }

    /// Persisted values win; blank or missing fields use the defaults.
    pub async fn load(&self) -> RepoConfig {
        let stored: StoredRepoConfig = match read_json_object(&self.path).await {
            Some(map) => serde_json::from_value(Value::Object(map)).unwrap_or_default(),
            None => StoredRepoConfig::default(),
        };

        let repo_url = stored
            .repo_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| self.default_repo_url.clone());
        let branch = stored
            .branch
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| self.default_branch.clone());

        RepoConfig {
            repo_url: repo_url.trim().to_string(),
            branch: normalize_branch(&branch),
        }
    }

    pub async fn save(&self, config: &RepoConfig) -> OpsResult<()> {
        let body = serde_json::to_vec_pretty(config)?;
        write_atomic(&self.path, &body).await?;
        tracing::info!(path = %self.path.display(), branch = %config.branch, "Saved repo config");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Runtime environment
// ---------------------------------------------------------------------------

/// Reads and merges `runtime_env.json`, and renders the worker's `.env` file.
#[derive(Debug, Clone)]
pub struct RuntimeConfigStore {
    path: PathBuf,
    ops_dir: PathBuf,
    defaults: HashMap<String, String>,
}

impl RuntimeConfigStore {
    /// `defaults` is the process environment snapshot taken at startup.
    pub fn new(path: PathBuf, ops_dir: PathBuf, defaults: HashMap<String, String>) -> Self {
        Self {
            path,
            ops_dir,
            defaults,
        }
    }

    /// Effective allow-listed values, in allow-list order.
    pub async fn read(&self) -> IndexMap<String, String> {
        let persisted = read_json_object(&self.path).await.unwrap_or_default();
        resolve(&persisted, &self.defaults)
    }

    /// Merge `partial` into the persisted document. Keys outside the
    /// allow-list are dropped.
    pub async fn write(&self, partial: &IndexMap<String, String>) -> OpsResult<()> {
        let mut persisted = read_json_object(&self.path).await.unwrap_or_default();
        for (key, value) in partial {
            if is_allowed_key(key) {
                persisted.insert(key.clone(), Value::String(value.clone()));
            } else {
                tracing::warn!(key = %key, "Ignoring runtime env key outside the allow-list");
            }
        }
        let body = serde_json::to_vec_pretty(&Value::Object(persisted))?;
        write_atomic(&self.path, &body).await?;
        Ok(())
    }

    /// Write `<dir>/.env` from the effective values plus `extra`, keeping
    /// the layout of any existing file. Returns the file path.
    pub async fn materialize_env_file(
        &self,
        dir: &Path,
        extra: &IndexMap<String, String>,
    ) -> OpsResult<PathBuf> {
        let mut values = self.read().await;
        for (key, value) in extra {
            values.insert(key.clone(), value.clone());
        }
        values.insert("PROJECT_ROOT".into(), dir.to_string_lossy().into_owned());
        values.insert("OPS_DIR".into(), self.ops_dir.to_string_lossy().into_owned());

        let path = dir.join(ENV_FILE_NAME);
        let existing = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let rendered = upsert_env_lines(&existing, &values);
        write_atomic(&path, rendered.as_bytes()).await?;
        tracing::debug!(path = %path.display(), keys = values.len(), "Rendered env file");
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

/// Read a JSON object. Missing, unreadable, or non-object content yields `None`.
async fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not read settings file");
            return None;
        }
    };
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) | Err(_) => {
            tracing::warn!(path = %path.display(), "Settings file is not a JSON object; treating as empty");
            None
        }
    }
}

/// Write `body` to a sibling temp file, then rename it over `path`.
async fn write_atomic(path: &Path, body: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await
}
