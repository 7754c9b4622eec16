//! Error types for the berth agent

/// Berth error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("container engine not found: {0}")]
    EngineNotFound(String),

    #[error("container engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("container engine permission denied: {0}")]
    EnginePermissionDenied(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("container crashed on start (exit code {exit_code}, status {status}): {logs}")]
    CrashOnStart {
        exit_code: i32,
        status: String,
        logs: String,
    },

    #[error("deploy failed: {0}")]
    DeployFailed(String),

    #[error("container did not reach running state (last status {status}): {logs}")]
    VerifyTimeout { status: String, logs: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    DbError(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for the berth agent
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn db<S: Into<String>>(msg: S) -> Self {
        Error::DbError(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::ConfigError(msg.into())
    }
}
