//! Shared error type across wsmux crates.

use thiserror::Error;

/// Stable error codes (safe to log, match on, or surface to applications).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Truncated or malformed frame.
    Decode,
    /// Server rejected the connection's credentials.
    AuthFailed,
    /// Physical connection reported a failure.
    Connection,
    /// Operation not valid in the current channel state.
    InvalidState,
    /// No live physical connection.
    NotConnected,
    /// Pending call replaced before a reply arrived.
    CallSuperseded,
    /// Invalid configuration.
    Config,
    /// Durable session store failure.
    Store,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and test vectors.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Decode => "DECODE",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::Connection => "CONNECTION",
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::CallSuperseded => "CALL_SUPERSEDED",
            ErrorCode::Config => "CONFIG",
            ErrorCode::Store => "STORE",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Unified error type used by core and client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("connection error: {0}")]
    Connection(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("not connected")]
    NotConnected,
    #[error("pending call superseded")]
    CallSuperseded,
    #[error("config: {0}")]
    Config(String),
    #[error("session store: {0}")]
    Store(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl ClientError {
    /// Map to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            ClientError::Decode(_) => ErrorCode::Decode,
            ClientError::AuthenticationFailed => ErrorCode::AuthFailed,
            ClientError::Connection(_) => ErrorCode::Connection,
            ClientError::InvalidState(_) => ErrorCode::InvalidState,
            ClientError::NotConnected => ErrorCode::NotConnected,
            ClientError::CallSuperseded => ErrorCode::CallSuperseded,
            ClientError::Config(_) => ErrorCode::Config,
            ClientError::Store(_) => ErrorCode::Store,
            ClientError::Internal(_) => ErrorCode::Internal,
        }
    }
}
