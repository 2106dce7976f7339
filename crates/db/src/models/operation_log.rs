//! Operation log entity models and DTOs.
//!
//! Operation logs are an append-only audit trail of administrative actions.
//! Rows have no `updated_at` field.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use znas_core::types::{DbId, Timestamp};

/// A single operation log entry. Immutable once created.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OperationLog {
    pub id: DbId,
    pub operator_id: Option<DbId>,
    pub action: String,
    pub target: String,
    pub summary: String,
    pub detail: serde_json::Value,
    pub integrity_hash: Option<String>,
    pub created_at: Timestamp,
}

/// DTO for inserting a new operation log entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOperationLog {
    pub operator_id: Option<DbId>,
    pub action: String,
    pub target: String,
    pub summary: String,
    pub detail: serde_json::Value,
}

/// Result of an integrity chain verification.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityCheckResult {
    /// Number of entries verified.
    pub verified_entries: i64,
    /// Whether the entire chain is valid.
    pub chain_valid: bool,
    /// ID of the first entry where the chain breaks, if any.
    pub first_break: Option<DbId>,
}
