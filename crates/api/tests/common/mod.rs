#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;

use znas_api::auth::jwt::{generate_access_token, JwtConfig};
use znas_api::config::ServerConfig;
use znas_api::router::build_app_router;
use znas_api::state::AppState;
use znas_core::roles::{ROLE_ADMIN, ROLE_STAFF};
use znas_ops::config::OpsConfig;
use znas_ops::git::GitClient;
use znas_ops::task::{PreparedTask, WorkerLauncher};
use znas_ops::{OpsResult, OpsService};

const TEST_SECRET: &str = "test-secret-that-is-long-enough-for-hmac";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        jwt: JwtConfig {
            secret: TEST_SECRET.to_string(),
            access_token_expiry_mins: 15,
        },
    }
}

/// Pretends to start workers; reports a fixed pid.
pub struct NoopLauncher;

#[async_trait]
impl WorkerLauncher for NoopLauncher {
    fn engine(&self) -> &'static str {
        "noop"
    }

    async fn launch(&self, _task: &PreparedTask) -> OpsResult<Option<u32>> {
        Ok(Some(4242))
    }
}

/// Ops config rooted in `ops_dir`, with its own git global config file.
pub fn ops_config(ops_dir: &Path) -> OpsConfig {
    OpsConfig::with_ops_dir(ops_dir.join("ops"))
}

/// Git client that never reads or writes the real global config.
pub fn git_client(ops_dir: &Path) -> GitClient {
    let gitconfig = ops_dir.join("gitconfig");
    if !gitconfig.exists() {
        std::fs::write(&gitconfig, "").expect("write gitconfig");
    }
    GitClient::default()
        .with_env("GIT_CONFIG_GLOBAL", gitconfig.to_str().expect("utf-8 path"))
        .with_env("GIT_CONFIG_NOSYSTEM", "1")
}

/// Build the app exactly as `main` does, against `pool` and the given ops config.
pub fn build_test_app_with(pool: PgPool, ops_dir: &Path, ops: OpsConfig) -> Router {
    let config = test_config();
    let service = OpsService::with_parts(ops, git_client(ops_dir), Arc::new(NoopLauncher));
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        ops: Arc::new(service),
    };
    build_app_router(state, &config)
}

pub fn build_test_app(pool: PgPool, ops_dir: &Path) -> Router {
    build_test_app_with(pool, ops_dir, ops_config(ops_dir))
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

pub fn admin_token() -> String {
    generate_access_token(1, ROLE_ADMIN, &test_config().jwt).expect("token")
}

pub fn staff_token() -> String {
    generate_access_token(2, ROLE_STAFF, &test_config().jwt).expect("token")
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

async fn send(
    app: Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None, None).await
}

pub async fn get_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    send(app, Method::GET, uri, Some(token), None).await
}

pub async fn put_json_auth(
    app: Router,
    uri: &str,
    body: serde_json::Value,
    token: &str,
) -> Response<Body> {
    send(app, Method::PUT, uri, Some(token), Some(body)).await
}

pub async fn post_json_auth(
    app: Router,
    uri: &str,
    body: serde_json::Value,
    token: &str,
) -> Response<Body> {
    send(app, Method::POST, uri, Some(token), Some(body)).await
}

pub async fn post_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    send(app, Method::POST, uri, Some(token), None).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Git remote
// ---------------------------------------------------------------------------

/// Create a bare remote at `<dir>/upstream.git` whose `main` carries both
/// worker scripts. Returns the remote path.
pub fn init_remote(dir: &Path) -> PathBuf {
    let upstream = dir.join("upstream.git");
    let seed = dir.join("seed");
    let gitconfig = dir.join("gitconfig");
    if !gitconfig.exists() {
        std::fs::write(&gitconfig, "").unwrap();
    }

    let git = |cwd: Option<&Path>, args: &[&str]| {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .env("GIT_CONFIG_GLOBAL", &gitconfig)
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("GIT_AUTHOR_NAME", "Api Test")
            .env("GIT_AUTHOR_EMAIL", "api@example.com")
            .env("GIT_COMMITTER_NAME", "Api Test")
            .env("GIT_COMMITTER_EMAIL", "api@example.com");
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        let out = cmd.output().expect("git runs");
        assert!(
            out.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&out.stderr)
        );
    };

    git(None, &["init", "--bare", "--quiet", upstream.to_str().unwrap()]);
    git(Some(&upstream), &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(None, &["init", "--quiet", seed.to_str().unwrap()]);
    git(Some(&seed), &["checkout", "--quiet", "-b", "main"]);
    std::fs::create_dir_all(seed.join("scripts")).unwrap();
    std::fs::write(seed.join("scripts/nas_update.sh"), "echo update\n").unwrap();
    std::fs::write(seed.join("scripts/nas_rollback.sh"), "echo rollback \"$1\"\n").unwrap();
    git(Some(&seed), &["add", "-A"]);
    git(Some(&seed), &["commit", "--quiet", "-m", "initial release"]);
    git(Some(&seed), &["tag", "v1.0.0"]);
    git(
        Some(&seed),
        &["push", "--quiet", "--tags", upstream.to_str().unwrap(), "main"],
    );
    upstream
}
