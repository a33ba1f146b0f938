//! Shared error type across canrelay crates.

use thiserror::Error;

/// Stable error codes, used in logs and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed or unframeable envelope.
    Protocol,
    /// Well-formed envelope the receiver cannot act on (e.g. unknown kind).
    Validation,
    /// Connect refused, reset, timeout.
    Transport,
    /// Invalid configuration detected at startup.
    Configuration,
    /// Visualization sink rejected a call.
    Sink,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Protocol => "PROTOCOL",
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::Configuration => "CONFIGURATION",
            ErrorCode::Sink => "SINK",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Unified error type used by core, server and client.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("sink error: {0}")]
    Sink(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl RelayError {
    /// Map the error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::Protocol(_) => ErrorCode::Protocol,
            RelayError::Validation(_) => ErrorCode::Validation,
            RelayError::Transport(_) => ErrorCode::Transport,
            RelayError::Configuration(_) => ErrorCode::Configuration,
            RelayError::Sink(_) => ErrorCode::Sink,
            RelayError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Errors that only affect a single connection or message.
    pub fn is_local(&self) -> bool {
        !matches!(self, RelayError::Configuration(_))
    }
}

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        RelayError::Transport(e.to_string())
    }
}
