use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use znas_core::error::CoreError;
use znas_ops::OpsError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] and [`OpsError`] and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `znas_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An orchestration error from `znas_ops`.
    #[error(transparent)]
    Ops(#[from] OpsError),

    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

const SANITIZED: &str = "An internal error occurred";

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Unauthorized(msg) => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
                }
                CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        SANITIZED.to_string(),
                    )
                }
            },

            AppError::Ops(err) => classify_ops_error(err),

            AppError::Database(err) => classify_sqlx_error(err),

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    SANITIZED.to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Classify an orchestrator error into an HTTP status, error code, and message.
///
/// Failures of an external step (clone, fetch, worker start, git) surface
/// as 502 with the captured output so the operator can act on it. Local
/// faults (filesystem, serialization, audit insert) are sanitized.
fn classify_ops_error(err: &OpsError) -> (StatusCode, &'static str, String) {
    match err {
        OpsError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        OpsError::Configuration(msg) => {
            (StatusCode::BAD_REQUEST, "CONFIGURATION_ERROR", msg.clone())
        }
        OpsError::FeatureDisabled => (
            StatusCode::FORBIDDEN,
            "FEATURE_DISABLED",
            err.to_string(),
        ),
        OpsError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
        OpsError::Busy(_) => (StatusCode::CONFLICT, "BUSY", err.to_string()),
        OpsError::Timeout { .. } => {
            tracing::warn!(error = %err, "Ops command timed out");
            (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", err.to_string())
        }
        OpsError::Initialization(_) => {
            (StatusCode::BAD_GATEWAY, "INITIALIZATION_ERROR", err.to_string())
        }
        OpsError::Fetch(_) => (StatusCode::BAD_GATEWAY, "FETCH_ERROR", err.to_string()),
        OpsError::Orchestration(_) => {
            (StatusCode::BAD_GATEWAY, "ORCHESTRATION_ERROR", err.to_string())
        }
        OpsError::Git { .. } => (StatusCode::BAD_GATEWAY, "GIT_ERROR", err.to_string()),
        OpsError::Audit(_) | OpsError::Io(_) | OpsError::Json(_) => {
            tracing::error!(error = %err, "Ops internal error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                SANITIZED.to_string(),
            )
        }
    }
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// - `RowNotFound` maps to 404.
/// - Everything else maps to 500 with a sanitized message.
fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        other => {
            tracing::error!(error = %other, "Database error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                SANITIZED.to_string(),
            )
        }
    }
}
