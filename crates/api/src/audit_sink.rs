//! Bridges orchestrator audit entries into the `operation_logs` table.

use async_trait::async_trait;
use sqlx::PgPool;
use znas_db::models::operation_log::CreateOperationLog;
use znas_db::repositories::OperationLogRepo;
use znas_ops::audit::{AuditEntry, AuditSink};
use znas_ops::{OpsError, OpsResult};

/// Writes each entry in its own short transaction.
///
/// No transaction is open while the flow clones, syncs or spawns; one is
/// begun when the flow records and committed before `record` returns. A flow
/// that fails before recording leaves no row behind.
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&mut self, entry: AuditEntry) -> OpsResult<()> {
        let input = CreateOperationLog {
            operator_id: entry.operator_id,
            action: entry.action,
            target: entry.target,
            summary: entry.summary,
            detail: entry.detail,
        };
        let audit_err = |e: sqlx::Error| OpsError::Audit(e.to_string());

        let mut tx = self.pool.begin().await.map_err(audit_err)?;
        let row = OperationLogRepo::insert(&mut tx, &input)
            .await
            .map_err(audit_err)?;
        tx.commit().await.map_err(audit_err)?;

        tracing::debug!(id = row.id, action = %row.action, "Operation log appended");
        Ok(())
    }
}
