//! Handlers for the self-update and version-rollback endpoints.
//!
//! All endpoints require the admin role. Mutations hand the orchestrator a
//! [`PgAuditSink`], which writes the operation log row once the flow records
//! it; no transaction is held while git or the worker runs.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use znas_core::runtime_env::TunnelConfig;
use znas_ops::service::TunnelApplyOutcome;

use crate::audit_sink::PgAuditSink;
use crate::error::AppResult;
use crate::middleware::rbac::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / query parameter types
// ---------------------------------------------------------------------------

/// Body of `PUT /tunnel/config`.
#[derive(Debug, Deserialize)]
pub struct TunnelConfigRequest {
    #[serde(flatten)]
    pub config: TunnelConfig,
    #[serde(default)]
    pub apply: bool,
}

#[derive(Debug, Serialize)]
pub struct TunnelConfigResponse {
    pub result: TunnelApplyOutcome,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

/// Body of `PUT /repo/config`.
#[derive(Debug, Deserialize)]
pub struct RepoConfigRequest {
    #[serde(default)]
    pub repo_url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_true")]
    pub initialize: bool,
}

/// Body of `POST /version/rollback`.
#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    #[serde(rename = "ref")]
    pub git_ref: String,
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Tunnel
// ---------------------------------------------------------------------------

/// GET /admin/system/tunnel/config
pub async fn get_tunnel_config(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> AppResult<impl IntoResponse> {
    let config = state.ops.tunnel_config().await;
    Ok(Json(DataResponse { data: config }))
}

/// PUT /admin/system/tunnel/config
///
/// Saves the `TS_*` settings; with `apply: true` also brings the tunnel
/// sidecar up through compose.
pub async fn set_tunnel_config(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(body): Json<TunnelConfigRequest>,
) -> AppResult<impl IntoResponse> {
    let mut sink = PgAuditSink::new(state.pool.clone());
    let result = state
        .ops
        .set_tunnel_config(&admin.operator(), &body.config, body.apply, &mut sink)
        .await?;

    Ok(Json(DataResponse {
        data: TunnelConfigResponse { result },
    }))
}

// ---------------------------------------------------------------------------
// Repository source
// ---------------------------------------------------------------------------

/// GET /admin/system/repo/config
pub async fn get_repo_config(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> AppResult<impl IntoResponse> {
    let view = state.ops.repo_config().await;
    Ok(Json(DataResponse { data: view }))
}

/// PUT /admin/system/repo/config
pub async fn set_repo_config(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(body): Json<RepoConfigRequest>,
) -> AppResult<impl IntoResponse> {
    let mut sink = PgAuditSink::new(state.pool.clone());
    let saved = state
        .ops
        .set_repo_config(
            &admin.operator(),
            &body.repo_url,
            &body.branch,
            body.initialize,
            &mut sink,
        )
        .await?;

    Ok(Json(DataResponse { data: saved }))
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

/// GET /admin/system/update/status
pub async fn update_status(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> AppResult<impl IntoResponse> {
    let status = state.ops.update_status().await?;
    Ok(Json(DataResponse { data: status }))
}

/// POST /admin/system/update/apply
///
/// Returns 202 once the worker is running; the update itself finishes later.
pub async fn apply_update(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
) -> AppResult<impl IntoResponse> {
    let mut sink = PgAuditSink::new(state.pool.clone());
    let started = state.ops.apply_update(&admin.operator(), &mut sink).await?;

    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: started })))
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// GET /admin/system/version/state
pub async fn version_state(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> AppResult<impl IntoResponse> {
    let snapshot = state.ops.version_state().await?;
    Ok(Json(DataResponse { data: snapshot }))
}

/// GET /admin/system/version/history?limit=
pub async fn version_history(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Query(params): Query<LimitParams>,
) -> AppResult<impl IntoResponse> {
    let commits = state.ops.version_history(params.limit).await?;
    Ok(Json(DataResponse { data: commits }))
}

/// GET /admin/system/version/tags?limit=
pub async fn version_tags(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Query(params): Query<LimitParams>,
) -> AppResult<impl IntoResponse> {
    let tags = state.ops.version_tags(params.limit).await?;
    Ok(Json(DataResponse { data: tags }))
}

/// POST /admin/system/version/rollback
pub async fn rollback(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(body): Json<RollbackRequest>,
) -> AppResult<impl IntoResponse> {
    let mut sink = PgAuditSink::new(state.pool.clone());
    let started = state
        .ops
        .rollback(&admin.operator(), &body.git_ref, &mut sink)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: started })))
}

/// POST /admin/system/version/rollback/latest
pub async fn rollback_latest(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
) -> AppResult<impl IntoResponse> {
    let mut sink = PgAuditSink::new(state.pool.clone());
    let started = state
        .ops
        .rollback_latest(&admin.operator(), &mut sink)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: started })))
}
