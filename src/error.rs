//! Error types for the sandbox agent.
//!
//! Compile failures, crashes and timeouts of submitted programs are not
//! errors: they are reported as an [`ExecutionStatus`](crate::verdict::ExecutionStatus).
//! These variants cover requests the worker refuses and faults of the
//! worker itself.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    /// Language unknown or not enabled on this worker
    #[error("language '{0}' is not enabled on this worker")]
    UnsupportedLanguage(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    /// No execution slot became free within the queue timeout (ms)
    #[error("worker busy: no execution slot within {0} ms")]
    Busy(u64),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        AgentError::Io {
            context: context.into(),
            source,
        }
    }

    /// HTTP status used when this error ends a request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AgentError::UnsupportedLanguage(_) | AgentError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AgentError::SessionNotFound(_) | AgentError::FileNotFound(_) => StatusCode::NOT_FOUND,
            AgentError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            AgentError::Config(_)
            | AgentError::Io { .. }
            | AgentError::Spawn { .. }
            | AgentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::UnsupportedLanguage(_) => "unsupported_language",
            AgentError::InvalidRequest(_) => "invalid_request",
            AgentError::SessionNotFound(_) => "session_not_found",
            AgentError::FileNotFound(_) => "file_not_found",
            AgentError::Busy(_) => "busy",
            AgentError::Config(_) => "config",
            AgentError::Io { .. } => "io",
            AgentError::Spawn { .. } => "spawn",
            AgentError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
