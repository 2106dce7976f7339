//! Repository for the `operation_logs` table.

use sqlx::{PgPool, Postgres, Transaction};
use znas_core::audit::{canonical_entry, compute_integrity_hash, redact_sensitive_fields};

use crate::models::operation_log::{CreateOperationLog, IntegrityCheckResult, OperationLog};

/// Column list for `operation_logs` SELECT queries.
const COLUMNS: &str = "\
    id, operator_id, action, target, summary, detail, integrity_hash, created_at";

/// Advisory lock key serializing appends so the hash chain stays linear.
const CHAIN_LOCK_KEY: i64 = 0x6f70_6c6f_67;

/// Provides append and query operations for operation logs.
pub struct OperationLogRepo;

impl OperationLogRepo {
    /// Append an entry inside the caller's transaction.
    ///
    /// Sensitive detail fields are redacted before storage and the entry is
    /// chained to the previous row's integrity hash. The caller commits.
    pub async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        input: &CreateOperationLog,
    ) -> Result<OperationLog, sqlx::Error> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(CHAIN_LOCK_KEY)
            .execute(&mut **tx)
            .await?;

        let prev_hash = sqlx::query_scalar::<_, Option<String>>(
            "SELECT integrity_hash FROM operation_logs ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&mut **tx)
        .await?
        .flatten();

        let detail = redact_sensitive_fields(&input.detail);
        let entry_data = canonical_entry(
            input.operator_id,
            &input.action,
            &input.target,
            &input.summary,
            &detail,
        );
        let hash = compute_integrity_hash(prev_hash.as_deref(), &entry_data);

        let query = format!(
            "INSERT INTO operation_logs \
                (operator_id, action, target, summary, detail, integrity_hash) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, OperationLog>(&query)
            .bind(input.operator_id)
            .bind(&input.action)
            .bind(&input.target)
            .bind(&input.summary)
            .bind(&detail)
            .bind(&hash)
            .fetch_one(&mut **tx)
            .await
    }

    /// Most recent entries first, optionally filtered by action.
    pub async fn list_recent(
        pool: &PgPool,
        action: Option<&str>,
        limit: i64,
    ) -> Result<Vec<OperationLog>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM operation_logs \
             WHERE ($1::TEXT IS NULL OR action = $1) \
             ORDER BY id DESC LIMIT $2"
        );
        sqlx::query_as::<_, OperationLog>(&query)
            .bind(action)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Recompute the hash chain from the first row and report the first break.
    pub async fn verify_chain(pool: &PgPool) -> Result<IntegrityCheckResult, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM operation_logs ORDER BY id ASC");
        let rows = sqlx::query_as::<_, OperationLog>(&query)
            .fetch_all(pool)
            .await?;

        let mut prev: Option<String> = None;
        let mut verified = 0i64;
        for row in &rows {
            let entry_data = canonical_entry(
                row.operator_id,
                &row.action,
                &row.target,
                &row.summary,
                &row.detail,
            );
            let expected = compute_integrity_hash(prev.as_deref(), &entry_data);
            if row.integrity_hash.as_deref() != Some(expected.as_str()) {
                tracing::warn!(id = row.id, "Operation log chain broken");
                return Ok(IntegrityCheckResult {
                    verified_entries: verified,
                    chain_valid: false,
                    first_break: Some(row.id),
                });
            }
            verified += 1;
            prev = Some(expected);
        }

        Ok(IntegrityCheckResult {
            verified_entries: verified,
            chain_valid: true,
            first_break: None,
        })
    }
}
