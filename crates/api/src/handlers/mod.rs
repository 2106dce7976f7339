//! Request handlers.
//!
//! Handlers extract the admin operator, delegate to [`znas_ops::OpsService`]
//! or a `znas_db` repository and map errors via [`crate::error::AppError`].

pub mod operation_logs;
pub mod system;
