//! Runtime environment allow-list, layered resolution and `.env` rendering.
//!
//! The runtime environment is the set of operator-editable settings handed
//! to the update/rollback worker. Values are resolved from two layers
//! (persisted overrides first, then process defaults) and rendered into a
//! `KEY=value` file that the worker's compose setup reads.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Keys owned by the tunnel (Tailscale) sidecar configuration.
pub const TUNNEL_KEYS: &[&str] = &[
    "TS_CONTAINER_NAME",
    "TS_HOSTNAME",
    "TS_AUTHKEY",
    "TS_STATE_DIR",
    "TS_USERSPACE",
    "TS_ROUTES",
];

/// Every key the runtime environment may carry, in rendering order.
pub const RUNTIME_ENV_KEYS: &[&str] = &[
    "POSTGRES_DB",
    "POSTGRES_USER",
    "POSTGRES_PASSWORD",
    "JWT_SECRET_KEY",
    "ADMIN_USERNAME",
    "ADMIN_PASSWORD",
    "TZ",
    "IMAGES_DIR",
    "ENABLE_WEB_OPS",
    "PROJECT_ROOT",
    "OPS_DIR",
    "REPO_URL",
    "UPDATE_BRANCH",
    "BACKEND_IMAGE",
    "FRONTEND_IMAGE",
    "APP_VERSION",
    "TS_CONTAINER_NAME",
    "TS_HOSTNAME",
    "TS_AUTHKEY",
    "TS_STATE_DIR",
    "TS_USERSPACE",
    "TS_ROUTES",
];

/// Whether `key` belongs to the runtime environment allow-list.
pub fn is_allowed_key(key: &str) -> bool {
    RUNTIME_ENV_KEYS.contains(&key)
}

/// Snapshot the allow-listed keys from a process environment iterator.
///
/// Called once at startup with `std::env::vars()`; tests pass fixtures.
pub fn capture_defaults<I>(vars: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter(|(k, _)| is_allowed_key(k))
        .collect()
}

/// Resolve the runtime environment from persisted values and defaults.
///
/// For each allow-listed key the persisted value wins (nulls are ignored),
/// then the process default. Keys present in neither layer are omitted.
/// Non-string JSON values are rendered with their JSON text.
pub fn resolve(
    persisted: &serde_json::Map<String, serde_json::Value>,
    defaults: &HashMap<String, String>,
) -> IndexMap<String, String> {
    let mut merged = IndexMap::new();
    for &key in RUNTIME_ENV_KEYS {
        let persisted_value = persisted.get(key).and_then(json_to_env_value);
        if let Some(value) = persisted_value {
            merged.insert(key.to_string(), value);
        } else if let Some(value) = defaults.get(key) {
            merged.insert(key.to_string(), value.clone());
        }
    }
    merged
}

fn json_to_env_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// .env rendering
// ---------------------------------------------------------------------------

/// Key of an assignment line, or `None` for blanks, comments and junk.
fn line_key(line: &str) -> Option<&str> {
    let stripped = line.trim();
    if stripped.is_empty() || stripped.starts_with('#') {
        return None;
    }
    let (key, _) = stripped.split_once('=')?;
    let key = key.trim();
    (!key.is_empty()).then_some(key)
}

/// Values are written on a single line.
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], "")
}

/// Merge `values` into existing `.env` content.
///
/// Existing lines keep their positions; an assignment whose key is in
/// `values` is rewritten in place (the last occurrence, if duplicated),
/// keys not yet present are appended in iteration order, and comments and
/// blank lines are preserved. The result always ends with a newline.
pub fn upsert_env_lines(existing: &str, values: &IndexMap<String, String>) -> String {
    let mut lines: Vec<String> = existing.lines().map(str::to_string).collect();

    let mut index_map: HashMap<String, usize> = HashMap::new();
    for (idx, line) in lines.iter().enumerate() {
        if let Some(key) = line_key(line) {
            index_map.insert(key.to_string(), idx);
        }
    }

    for (key, value) in values {
        let line = format!("{key}={}", single_line(value));
        match index_map.get(key.as_str()) {
            Some(&idx) => lines[idx] = line,
            None => {
                index_map.insert(key.clone(), lines.len());
                lines.push(line);
            }
        }
    }

    let mut out = lines.join("\n").trim_end().to_string();
    out.push('\n');
    out
}

/// Parse `.env` content into key/value pairs (later duplicates win).
pub fn parse_env_lines(content: &str) -> IndexMap<String, String> {
    let mut parsed = IndexMap::new();
    for line in content.lines() {
        if let Some(key) = line_key(line) {
            let value = line
                .trim()
                .split_once('=')
                .map(|(_, v)| v.to_string())
                .unwrap_or_default();
            parsed.insert(key.to_string(), value);
        }
    }
    parsed
}

// ---------------------------------------------------------------------------
// Tunnel configuration view
// ---------------------------------------------------------------------------

pub const DEFAULT_TS_CONTAINER_NAME: &str = "tailscaled";
pub const DEFAULT_TS_HOSTNAME: &str = "znas-server";
pub const DEFAULT_TS_STATE_DIR: &str = "/var/lib/tailscale";
pub const DEFAULT_TS_ROUTES: &str = "192.168.1.0/24";

/// Typed view over the `TS_*` runtime environment keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub container_name: String,
    pub hostname: String,
    pub auth_key: String,
    pub state_dir: String,
    pub userspace: bool,
    pub routes: String,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            container_name: DEFAULT_TS_CONTAINER_NAME.to_string(),
            hostname: DEFAULT_TS_HOSTNAME.to_string(),
            auth_key: String::new(),
            state_dir: DEFAULT_TS_STATE_DIR.to_string(),
            userspace: false,
            routes: DEFAULT_TS_ROUTES.to_string(),
        }
    }
}

fn or_default(value: Option<&String>, default: &str) -> String {
    match value.map(|v| v.trim()) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default.to_string(),
    }
}

impl TunnelConfig {
    /// Build the view from a resolved runtime environment.
    pub fn from_env_map(env: &IndexMap<String, String>) -> Self {
        Self {
            container_name: or_default(env.get("TS_CONTAINER_NAME"), DEFAULT_TS_CONTAINER_NAME),
            hostname: or_default(env.get("TS_HOSTNAME"), DEFAULT_TS_HOSTNAME),
            auth_key: env
                .get("TS_AUTHKEY")
                .map(|v| v.trim().to_string())
                .unwrap_or_default(),
            state_dir: or_default(env.get("TS_STATE_DIR"), DEFAULT_TS_STATE_DIR),
            userspace: env
                .get("TS_USERSPACE")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("true")),
            routes: or_default(env.get("TS_ROUTES"), DEFAULT_TS_ROUTES),
        }
    }

    /// Render as `TS_*` pairs, substituting defaults for blank fields.
    pub fn to_env_pairs(&self) -> IndexMap<String, String> {
        let mut pairs = IndexMap::new();
        pairs.insert(
            "TS_CONTAINER_NAME".to_string(),
            or_default(Some(&self.container_name), DEFAULT_TS_CONTAINER_NAME),
        );
        pairs.insert(
            "TS_HOSTNAME".to_string(),
            or_default(Some(&self.hostname), DEFAULT_TS_HOSTNAME),
        );
        pairs.insert("TS_AUTHKEY".to_string(), self.auth_key.trim().to_string());
        pairs.insert(
            "TS_STATE_DIR".to_string(),
            or_default(Some(&self.state_dir), DEFAULT_TS_STATE_DIR),
        );
        pairs.insert(
            "TS_USERSPACE".to_string(),
            if self.userspace { "true" } else { "false" }.to_string(),
        );
        pairs.insert(
            "TS_ROUTES".to_string(),
            or_default(Some(&self.routes), DEFAULT_TS_ROUTES),
        );
        pairs
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn map(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn persisted_value_wins_over_default() {
        let persisted = json!({"TZ": "Asia/Shanghai"});
        let defaults = HashMap::from([("TZ".to_string(), "UTC".to_string())]);
        let env = resolve(persisted.as_object().unwrap(), &defaults);
        assert_eq!(env.get("TZ").map(String::as_str), Some("Asia/Shanghai"));
    }

    #[test]
    fn falls_back_to_default_and_omits_missing() {
        let persisted = json!({"TZ": null});
        let defaults = HashMap::from([("TZ".to_string(), "UTC".to_string())]);
        let env = resolve(persisted.as_object().unwrap(), &defaults);
        assert_eq!(env.get("TZ").map(String::as_str), Some("UTC"));
        assert!(!env.contains_key("REPO_URL"));
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn unknown_keys_never_read_back() {
        let persisted = json!({"EVIL": "1", "APP_VERSION": 3});
        let defaults = HashMap::from([("PATH".to_string(), "/bin".to_string())]);
        let env = resolve(persisted.as_object().unwrap(), &defaults);
        assert_eq!(env.keys().collect::<Vec<_>>(), vec!["APP_VERSION"]);
        assert_eq!(env["APP_VERSION"], "3");
    }

    #[test]
    fn resolved_keys_follow_allow_list_order() {
        let persisted = json!({"TS_ROUTES": "10.0.0.0/8", "POSTGRES_DB": "znas"});
        let env = resolve(persisted.as_object().unwrap(), &HashMap::new());
        assert_eq!(
            env.keys().collect::<Vec<_>>(),
            vec!["POSTGRES_DB", "TS_ROUTES"]
        );
    }

    #[test]
    fn capture_defaults_filters_allow_list() {
        let defaults = capture_defaults(vec![
            ("HOME".to_string(), "/root".to_string()),
            ("TZ".to_string(), "UTC".to_string()),
        ]);
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults["TZ"], "UTC");
    }

    #[test]
    fn upsert_into_empty_file() {
        let out = upsert_env_lines("", &map(&[("A", "1"), ("B", "2")]));
        assert_eq!(out, "A=1\nB=2\n");
    }

    #[test]
    fn upsert_preserves_positions_comments_and_unrelated_keys() {
        let existing = "# managed by hand\nKEEP=yes\nTZ=UTC\n\nOTHER=x\n";
        let out = upsert_env_lines(existing, &map(&[("TZ", "Asia/Shanghai"), ("NEW", "n")]));
        assert_eq!(
            out,
            "# managed by hand\nKEEP=yes\nTZ=Asia/Shanghai\n\nOTHER=x\nNEW=n\n"
        );
    }

    #[test]
    fn upsert_is_idempotent() {
        let values = map(&[("A", "1"), ("B", "2")]);
        let once = upsert_env_lines("X=0\n", &values);
        let twice = upsert_env_lines(&once, &values);
        assert_eq!(once, twice);
    }

    #[test]
    fn upsert_strips_line_breaks_from_values() {
        let out = upsert_env_lines("", &map(&[("A", "x\ny\r")]));
        assert_eq!(out, "A=xy\n");
    }

    #[test]
    fn round_trip_is_order_independent() {
        let values = map(&[("B", "2"), ("A", "1=1"), ("C", "")]);
        let out = upsert_env_lines("A=old\n", &values);
        let parsed = parse_env_lines(&out);
        for (k, v) in &values {
            assert_eq!(parsed.get(k), Some(v));
        }
        assert_eq!(parsed.len(), values.len());
    }

    #[test]
    fn tunnel_defaults_for_blank_values() {
        let env = map(&[("TS_HOSTNAME", "  "), ("TS_USERSPACE", "TRUE")]);
        let cfg = TunnelConfig::from_env_map(&env);
        assert_eq!(cfg.hostname, DEFAULT_TS_HOSTNAME);
        assert!(cfg.userspace);
        assert_eq!(cfg.routes, DEFAULT_TS_ROUTES);
        assert_eq!(cfg.auth_key, "");
    }

    #[test]
    fn tunnel_pairs_cover_all_keys() {
        let cfg = TunnelConfig {
            hostname: "nas".into(),
            auth_key: " tskey ".into(),
            ..TunnelConfig::default()
        };
        let pairs = cfg.to_env_pairs();
        assert_eq!(pairs.len(), TUNNEL_KEYS.len());
        assert_eq!(pairs["TS_HOSTNAME"], "nas");
        assert_eq!(pairs["TS_AUTHKEY"], "tskey");
        assert_eq!(pairs["TS_USERSPACE"], "false");
        assert!(pairs.keys().all(|k| is_allowed_key(k)));
    }
}
