//! Read access to the operation log written by the system endpoints.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use znas_db::repositories::OperationLogRepo;

use crate::error::AppResult;
use crate::middleware::rbac::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct OperationLogQuery {
    pub action: Option<String>,
    pub limit: Option<i64>,
}

/// GET /admin/system/operation-logs?action=&limit=
pub async fn list_operation_logs(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Query(params): Query<OperationLogQuery>,
) -> AppResult<impl IntoResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let action = params.action.as_deref().filter(|a| !a.trim().is_empty());
    let rows = OperationLogRepo::list_recent(&state.pool, action, limit).await?;
    Ok(Json(DataResponse { data: rows }))
}

/// GET /admin/system/operation-logs/integrity-check
///
/// Recomputes the hash chain over every row.
pub async fn check_integrity(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> AppResult<impl IntoResponse> {
    let result = OperationLogRepo::verify_chain(&state.pool).await?;
    Ok(Json(DataResponse { data: result }))
}
