//! Integration tests for the `/api/v1/admin/system` endpoints.
//!
//! Each test gets a fresh database (`sqlx::test`) and a temporary ops
//! directory. Workers are never actually started; the app is built with a
//! launcher that only reports a pid.

mod common;

use axum::http::StatusCode;
use common::{
    admin_token, body_json, get, get_auth, post_auth, post_json_auth, put_json_auth, staff_token,
};
use serde_json::json;
use sqlx::PgPool;

const BASE: &str = "/api/v1/admin/system";

async fn log_actions(pool: &PgPool) -> Vec<String> {
    sqlx::query_scalar::<_, String>("SELECT action FROM operation_logs ORDER BY id")
        .fetch_all(pool)
        .await
        .unwrap()
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn missing_token_returns_401(pool: PgPool) {
    let tmp = tempfile::tempdir().unwrap();
    let app = common::build_test_app(pool, tmp.path());

    let response = get(app, &format!("{BASE}/update/status")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["code"], "UNAUTHORIZED");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn garbage_token_returns_401(pool: PgPool) {
    let tmp = tempfile::tempdir().unwrap();
    let app = common::build_test_app(pool, tmp.path());

    let response = get_auth(app, &format!("{BASE}/repo/config"), "not-a-jwt").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn staff_role_returns_403(pool: PgPool) {
    let tmp = tempfile::tempdir().unwrap();
    let app = common::build_test_app(pool.clone(), tmp.path());

    let response = post_auth(app, &format!("{BASE}/update/apply"), &staff_token()).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["code"], "FORBIDDEN");
    assert!(log_actions(&pool).await.is_empty());
}

// ---------------------------------------------------------------------------
// Tunnel config
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn tunnel_config_defaults_then_saved_values(pool: PgPool) {
    let tmp = tempfile::tempdir().unwrap();
    let token = admin_token();

    let app = common::build_test_app(pool.clone(), tmp.path());
    let response = get_auth(app, &format!("{BASE}/tunnel/config"), &token).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["hostname"], "znas-server");
    assert_eq!(json["data"]["userspace"], false);

    let app = common::build_test_app(pool.clone(), tmp.path());
    let response = put_json_auth(
        app,
        &format!("{BASE}/tunnel/config"),
        json!({
            "hostname": "nas-attic",
            "auth_key": "tskey-auth-123",
            "userspace": true,
            "apply": false
        }),
        &token,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["result"], "saved");

    let app = common::build_test_app(pool.clone(), tmp.path());
    let response = get_auth(app, &format!("{BASE}/tunnel/config"), &token).await;
    let json = body_json(response).await;
    assert_eq!(json["data"]["hostname"], "nas-attic");
    assert_eq!(json["data"]["userspace"], true);
    // Blank fields fall back to defaults.
    assert_eq!(json["data"]["container_name"], "tailscaled");

    assert_eq!(log_actions(&pool).await, vec!["update_tailscale_config"]);
}

// ---------------------------------------------------------------------------
// Repo config
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn repo_config_saves_without_initializing(pool: PgPool) {
    let tmp = tempfile::tempdir().unwrap();
    let token = admin_token();

    let app = common::build_test_app(pool.clone(), tmp.path());
    let response = put_json_auth(
        app,
        &format!("{BASE}/repo/config"),
        json!({
            "repo_url": "https://example.com/znas.git",
            "branch": "  ",
            "initialize": false
        }),
        &token,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["branch"], "main");
    assert_eq!(json["data"]["initialized"], false);

    let app = common::build_test_app(pool.clone(), tmp.path());
    let response = get_auth(app, &format!("{BASE}/repo/config"), &token).await;
    let json = body_json(response).await;
    assert_eq!(json["data"]["repo_url"], "https://example.com/znas.git");
    assert_eq!(json["data"]["initialized"], false);

    assert_eq!(log_actions(&pool).await, vec!["set_repo_config"]);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn repo_config_rejects_invalid_branch(pool: PgPool) {
    let tmp = tempfile::tempdir().unwrap();
    let app = common::build_test_app(pool.clone(), tmp.path());

    let response = put_json_auth(
        app,
        &format!("{BASE}/repo/config"),
        json!({ "repo_url": "https://example.com/znas.git", "branch": "main;reboot" }),
        &admin_token(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(log_actions(&pool).await.is_empty());
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn status_on_uninitialized_copy_does_not_clone(pool: PgPool) {
    let tmp = tempfile::tempdir().unwrap();
    let app = common::build_test_app(pool, tmp.path());

    let response = get_auth(app, &format!("{BASE}/update/status"), &admin_token()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["enabled"], true);
    assert_eq!(json["data"]["initialized"], false);
    assert_eq!(json["data"]["has_update"], false);
    assert!(!tmp.path().join("ops/repo/.git").exists());
}

#[sqlx::test(migrations = "../db/migrations")]
async fn apply_when_disabled_returns_403_and_writes_nothing(pool: PgPool) {
    let tmp = tempfile::tempdir().unwrap();
    let mut ops = common::ops_config(tmp.path());
    ops.enable_web_ops = false;
    let token = admin_token();

    let app = common::build_test_app_with(pool.clone(), tmp.path(), ops.clone());
    let response = post_auth(app, &format!("{BASE}/update/apply"), &token).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["code"], "FEATURE_DISABLED");

    let app = common::build_test_app_with(pool.clone(), tmp.path(), ops);
    let response = get_auth(app, &format!("{BASE}/update/status"), &token).await;
    let json = body_json(response).await;
    assert_eq!(json["data"]["enabled"], false);

    assert!(log_actions(&pool).await.is_empty());
    assert!(!tmp.path().join("ops/repo").exists());
}

#[sqlx::test(migrations = "../db/migrations")]
async fn apply_without_repo_url_returns_400(pool: PgPool) {
    let tmp = tempfile::tempdir().unwrap();
    let app = common::build_test_app(pool.clone(), tmp.path());

    let response = post_auth(app, &format!("{BASE}/update/apply"), &admin_token()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "CONFIGURATION_ERROR");
    assert!(log_actions(&pool).await.is_empty());
}

#[sqlx::test(migrations = "../db/migrations")]
async fn apply_clones_and_starts_worker(pool: PgPool) {
    let tmp = tempfile::tempdir().unwrap();
    let upstream = common::init_remote(tmp.path());
    let mut ops = common::ops_config(tmp.path());
    ops.default_repo_url = upstream.to_str().unwrap().to_string();
    let token = admin_token();

    let app = common::build_test_app_with(pool.clone(), tmp.path(), ops.clone());
    let response = post_auth(app, &format!("{BASE}/update/apply"), &token).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["started"], true);
    assert_eq!(json["data"]["pid"], 4242);
    assert!(json["data"]["task_id"]
        .as_str()
        .unwrap()
        .starts_with("znas-update-"));
    assert!(json["data"]["log_path"]
        .as_str()
        .unwrap()
        .ends_with("update_web.log"));

    assert!(tmp.path().join("ops/repo/.git").exists());
    assert!(tmp.path().join("ops/repo/.env").exists());
    assert_eq!(log_actions(&pool).await, vec!["apply_update"]);

    // Freshly synced: nothing newer upstream.
    let app = common::build_test_app_with(pool.clone(), tmp.path(), ops);
    let response = get_auth(app, &format!("{BASE}/update/status"), &token).await;
    let json = body_json(response).await;
    assert_eq!(json["data"]["initialized"], true);
    assert_eq!(json["data"]["has_update"], false);
    assert_eq!(json["data"]["current_commit"], json["data"]["remote_commit"]);
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn rollback_rejects_metacharacters_before_touching_anything(pool: PgPool) {
    let tmp = tempfile::tempdir().unwrap();
    let app = common::build_test_app(pool.clone(), tmp.path());

    let response = post_json_auth(
        app,
        &format!("{BASE}/version/rollback"),
        json!({ "ref": "v1.0.0; rm -rf /" }),
        &admin_token(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");

    assert!(log_actions(&pool).await.is_empty());
    assert!(!tmp.path().join("ops/repo").exists());
}

#[sqlx::test(migrations = "../db/migrations")]
async fn rollback_to_tag_and_version_reads(pool: PgPool) {
    let tmp = tempfile::tempdir().unwrap();
    let upstream = common::init_remote(tmp.path());
    let mut ops = common::ops_config(tmp.path());
    ops.default_repo_url = upstream.to_str().unwrap().to_string();
    let token = admin_token();

    let app = common::build_test_app_with(pool.clone(), tmp.path(), ops.clone());
    let response = post_json_auth(
        app,
        &format!("{BASE}/version/rollback"),
        json!({ "ref": "v1.0.0" }),
        &token,
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert!(json["data"]["task_id"]
        .as_str()
        .unwrap()
        .starts_with("znas-rollback-"));

    let app = common::build_test_app_with(pool.clone(), tmp.path(), ops.clone());
    let response = get_auth(app, &format!("{BASE}/version/state"), &token).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["tag"], "v1.0.0");

    let app = common::build_test_app_with(pool.clone(), tmp.path(), ops.clone());
    let response = get_auth(app, &format!("{BASE}/version/tags?limit=5"), &token).await;
    let json = body_json(response).await;
    assert_eq!(json["data"], json!(["v1.0.0"]));

    let app = common::build_test_app_with(pool.clone(), tmp.path(), ops);
    let response = get_auth(app, &format!("{BASE}/version/history"), &token).await;
    let json = body_json(response).await;
    let commits = json["data"].as_array().unwrap();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0]["subject"], "initial release");

    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT action, target FROM operation_logs ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(
        rows,
        vec![("rollback_version".to_string(), "v1.0.0".to_string())]
    );
}

// ---------------------------------------------------------------------------
// Operation logs
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn operation_logs_list_filters_and_chain_verifies(pool: PgPool) {
    let tmp = tempfile::tempdir().unwrap();
    let token = admin_token();

    for hostname in ["nas-a", "nas-b"] {
        let app = common::build_test_app(pool.clone(), tmp.path());
        let response = put_json_auth(
            app,
            &format!("{BASE}/tunnel/config"),
            json!({ "hostname": hostname, "auth_key": "tskey-secret" }),
            &token,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let app = common::build_test_app(pool.clone(), tmp.path());
    let response = put_json_auth(
        app,
        &format!("{BASE}/repo/config"),
        json!({ "repo_url": "https://example.com/znas.git", "initialize": false }),
        &token,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let app = common::build_test_app(pool.clone(), tmp.path());
    let response = get_auth(
        app,
        &format!("{BASE}/operation-logs?action=update_tailscale_config&limit=1"),
        &token,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let rows = json["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["detail"]["hostname"], "nas-b");
    assert_eq!(rows[0]["operator_id"], 1);

    let app = common::build_test_app(pool.clone(), tmp.path());
    let response = get_auth(app, &format!("{BASE}/operation-logs"), &token).await;
    let json = body_json(response).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 3);

    let app = common::build_test_app(pool, tmp.path());
    let response = get_auth(
        app,
        &format!("{BASE}/operation-logs/integrity-check"),
        &token,
    )
    .await;
    let json = body_json(response).await;
    assert_eq!(json["data"]["chain_valid"], true);
    assert_eq!(json["data"]["verified_entries"], 3);
}
