//! Who asked, and where the record of it goes.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::OpsResult;

/// The authenticated caller of a mutating operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub user_id: i64,
    pub role: String,
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub operator_id: Option<i64>,
    pub action: String,
    pub target: String,
    pub summary: String,
    pub detail: Value,
}

impl AuditEntry {
    pub fn new(
        operator: &Operator,
        action: &str,
        target: impl Into<String>,
        summary: impl Into<String>,
        detail: Value,
    ) -> Self {
        Self {
            operator_id: Some(operator.user_id),
            action: action.to_string(),
            target: target.into(),
            summary: summary.into(),
            detail,
        }
    }
}

/// Destination for audit records.
///
/// Implementations write synchronously with respect to the calling flow;
/// whether the write is durable is up to whoever owns the surrounding
/// transaction.
#[async_trait]
pub trait AuditSink: Send {
    async fn record(&mut self, entry: AuditEntry) -> OpsResult<()>;
}
