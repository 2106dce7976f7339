use std::sync::Arc;

use znas_ops::OpsService;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheap to clone: everything is behind `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: znas_db::DbPool,
    /// Server configuration (bind address, CORS, JWT).
    pub config: Arc<ServerConfig>,
    /// Update / rollback orchestrator.
    pub ops: Arc<OpsService>,
}
