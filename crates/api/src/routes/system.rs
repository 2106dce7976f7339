//! Route definitions for system operations.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{operation_logs, system};
use crate::state::AppState;

/// Admin routes mounted at `/admin/system`.
///
/// All routes require the `admin` role (enforced by handler extractors).
///
/// ```text
/// GET  /tunnel/config                  -> get_tunnel_config
/// PUT  /tunnel/config                  -> set_tunnel_config
/// GET  /repo/config                    -> get_repo_config
/// PUT  /repo/config                    -> set_repo_config
/// GET  /update/status                  -> update_status
/// POST /update/apply                   -> apply_update
/// GET  /version/state                  -> version_state
/// GET  /version/history                -> version_history
/// GET  /version/tags                   -> version_tags
/// POST /version/rollback               -> rollback
/// POST /version/rollback/latest        -> rollback_latest
/// GET  /operation-logs                 -> list_operation_logs
/// GET  /operation-logs/integrity-check -> check_integrity
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/tunnel/config",
            get(system::get_tunnel_config).put(system::set_tunnel_config),
        )
        .route(
            "/repo/config",
            get(system::get_repo_config).put(system::set_repo_config),
        )
        .route("/update/status", get(system::update_status))
        .route("/update/apply", post(system::apply_update))
        .route("/version/state", get(system::version_state))
        .route("/version/history", get(system::version_history))
        .route("/version/tags", get(system::version_tags))
        .route("/version/rollback", post(system::rollback))
        .route("/version/rollback/latest", post(system::rollback_latest))
        .route("/operation-logs", get(operation_logs::list_operation_logs))
        .route(
            "/operation-logs/integrity-check",
            get(operation_logs::check_integrity),
        )
}
