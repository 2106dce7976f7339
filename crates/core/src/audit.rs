//! Operation log constants and utility functions.
//!
//! Lives in `core` so both the orchestrator and the repository layer agree
//! on action names, redaction and the integrity chain.

use crate::hashing;

// ---------------------------------------------------------------------------
// Action constants
// ---------------------------------------------------------------------------

/// Actions recorded by the system operations endpoints.
pub mod actions {
    pub const UPDATE_TUNNEL_CONFIG: &str = "update_tailscale_config";
    pub const SET_REPO_CONFIG: &str = "set_repo_config";
    pub const APPLY_UPDATE: &str = "apply_update";
    pub const ROLLBACK_VERSION: &str = "rollback_version";
}

/// Common `target` values for operation log entries.
pub mod targets {
    pub const SYSTEM: &str = "system";
    pub const TUNNEL: &str = "tailscale";
}

// ---------------------------------------------------------------------------
// Integrity hash computation
// ---------------------------------------------------------------------------

/// Known seed value for the first entry in the hash chain.
const CHAIN_SEED: &str = "ZNAS_OPERATION_LOG_CHAIN_V1";

/// Compute the SHA-256 integrity hash for an operation log entry.
///
/// `prev_hash` is the hash of the previous entry, or `None` for the first
/// entry in the chain.
pub fn compute_integrity_hash(prev_hash: Option<&str>, entry_data: &str) -> String {
    let prev = prev_hash.unwrap_or(CHAIN_SEED);
    let combined = format!("{prev}|{entry_data}");
    hashing::sha256_hex(combined.as_bytes())
}

/// Canonical string form of an entry used as input to the chain hash.
pub fn canonical_entry(
    operator_id: Option<i64>,
    action: &str,
    target: &str,
    summary: &str,
    detail: &serde_json::Value,
) -> String {
    let operator = operator_id.map(|id| id.to_string()).unwrap_or_default();
    format!("{operator}|{action}|{target}|{summary}|{detail}")
}

// ---------------------------------------------------------------------------
// Sensitive field redaction
// ---------------------------------------------------------------------------

/// Fields that should be redacted from log details before storage.
pub const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "token",
    "secret",
    "authkey",
    "auth_key",
    "api_key",
    "private_key",
    "authorization",
    "credential",
];

/// Redact sensitive fields from a JSON value.
///
/// Replaces the value of any object key containing one of
/// [`SENSITIVE_FIELDS`] with `"[REDACTED]"`, recursing into nested objects
/// and arrays.
pub fn redact_sensitive_fields(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, val) in map {
                let lower_key = key.to_lowercase();
                if SENSITIVE_FIELDS.iter().any(|f| lower_key.contains(f)) {
                    redacted.insert(
                        key.clone(),
                        serde_json::Value::String("[REDACTED]".to_string()),
                    );
                } else {
                    redacted.insert(key.clone(), redact_sensitive_fields(val));
                }
            }
            serde_json::Value::Object(redacted)
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(redact_sensitive_fields).collect())
        }
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
