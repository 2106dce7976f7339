use znas_core::error::CoreError;

/// Errors produced by the orchestrator.
///
/// The first six variants are the designed taxonomy; callers map them to
/// distinct responses so "could not even attempt" never looks like "started".
#[derive(Debug, thiserror::Error)]
pub enum OpsError {
    /// A required setting (e.g. the repository URL) is missing.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// User input failed validation before any process was touched.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Cloning the working copy failed; carries the captured git output.
    #[error("Repository initialization failed: {0}")]
    Initialization(String),

    /// Every remote lookup strategy failed.
    #[error("Remote lookup failed: {0}")]
    Fetch(String),

    /// The detached worker could not be started.
    #[error("Failed to start worker: {0}")]
    Orchestration(String),

    /// The operation is switched off by `ENABLE_WEB_OPS`.
    #[error("Web operations are disabled by server config")]
    FeatureDisabled,

    /// An external command exceeded its timeout and was killed.
    #[error("`{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    /// A git command exited non-zero.
    #[error("`{command}` failed: {output}")]
    Git { command: String, output: String },

    /// A required file (update or rollback script) is missing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Another mutating operation holds the working copy.
    #[error("Another operation is already running on {0}")]
    Busy(String),

    /// The audit sink rejected the entry.
    #[error("Audit log write failed: {0}")]
    Audit(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type OpsResult<T> = Result<T, OpsError>;

impl From<CoreError> for OpsError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => OpsError::Validation(msg),
            other => OpsError::Configuration(other.to_string()),
        }
    }
}
