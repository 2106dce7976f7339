//! Version-control value types and parsing for the deployed working copy.
//!
//! Everything here is pure: the `ops` crate runs `git` and feeds the raw
//! output through these helpers.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::CoreError;
use crate::types::Timestamp;

/// Pattern a user-supplied ref must match before it reaches any process.
pub const VALID_REF_PATTERN: &str = r"^[0-9A-Za-z._/-]{1,120}$";

static REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(VALID_REF_PATTERN).expect("valid regex"));

/// Branch used when none is configured.
pub const DEFAULT_BRANCH: &str = "main";

/// Remote name used for the working copy.
pub const REMOTE_NAME: &str = "origin";

/// Lower/upper bounds for history and tag listings.
pub const MIN_LISTING_LIMIT: i64 = 1;
pub const MAX_LISTING_LIMIT: i64 = 200;

/// `git log --pretty` format producing one [`CommitInfo`] per line.
///
/// Fields are separated by ASCII unit separators so commit subjects may
/// contain any printable character.
pub const LOG_FORMAT: &str = "--pretty=format:%H%x1f%h%x1f%cI%x1f%s";

const FIELD_SEP: char = '\u{1f}';

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Metadata for a single commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub commit: String,
    pub short_commit: String,
    pub committed_at: Timestamp,
    pub subject: String,
}

/// Point-in-time view of the working copy's checked-out version.
///
/// Derived on demand; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct VersionSnapshot {
    pub commit: String,
    pub short_commit: String,
    /// Branch name, or `"HEAD"` when detached.
    pub branch: String,
    /// Exact tag pointing at HEAD, if any.
    pub tag: Option<String>,
    pub subject: String,
    pub committed_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a rollback target. Returns the trimmed ref on success.
pub fn validate_ref(raw: &str) -> Result<String, CoreError> {
    let trimmed = raw.trim();
    if REF_RE.is_match(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(CoreError::Validation(format!(
            "Invalid ref: must match {VALID_REF_PATTERN}"
        )))
    }
}

/// Normalize a configured branch name, falling back to [`DEFAULT_BRANCH`].
pub fn normalize_branch(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        DEFAULT_BRANCH.to_string()
    } else {
        trimmed.to_string()
    }
}

/// `origin/<branch>`.
pub fn tracking_ref(branch: &str) -> String {
    format!("{REMOTE_NAME}/{branch}")
}

/// Clamp a requested listing size into `1..=200`, using `default` if unset.
pub fn clamp_limit(limit: Option<i64>, default: i64) -> usize {
    limit
        .unwrap_or(default)
        .clamp(MIN_LISTING_LIMIT, MAX_LISTING_LIMIT) as usize
}

/// Whether the local commit lags (or diverges from) the remote head.
///
/// Plain inequality: a rewritten remote history looks like a normal advance.
pub fn has_drift(local: &str, remote: &str) -> bool {
    local.trim() != remote.trim()
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse one line produced with [`LOG_FORMAT`].
pub fn parse_log_line(line: &str) -> Option<CommitInfo> {
    let mut parts = line.splitn(4, FIELD_SEP);
    let commit = parts.next()?.trim();
    let short_commit = parts.next()?.trim();
    let committed_at = parts.next()?.trim();
    let subject = parts.next()?;

    if !is_object_id(commit) {
        return None;
    }
    let committed_at = chrono::DateTime::parse_from_rfc3339(committed_at)
        .ok()?
        .with_timezone(&chrono::Utc);

    Some(CommitInfo {
        commit: commit.to_string(),
        short_commit: short_commit.to_string(),
        committed_at,
        subject: subject.to_string(),
    })
}

/// Parse `git log` output; malformed lines are skipped.
pub fn parse_log_rows(output: &str) -> Vec<CommitInfo> {
    output.lines().filter_map(parse_log_line).collect()
}

/// Extract the first object id from `git ls-remote` output.
pub fn parse_ls_remote_head(output: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .find(|hash| is_object_id(hash))
        .map(str::to_string)
}

/// Parse `git tag` output into at most `limit` names.
pub fn parse_tag_list(output: &str, limit: usize) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(limit)
        .map(str::to_string)
        .collect()
}

/// SHA-1 (40) or SHA-256 (64) hex object id.
fn is_object_id(s: &str) -> bool {
    (s.len() == 40 || s.len() == 64) && s.chars().all(|c| c.is_ascii_hexdigit())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
