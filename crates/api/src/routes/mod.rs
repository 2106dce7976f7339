pub mod health;
pub mod system;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /admin/system/...        self-update, rollback and tunnel settings (admin only)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/admin/system", system::router())
}
