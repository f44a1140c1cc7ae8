//! Error types for Virtgate

use thiserror::Error;

/// Result type alias using Virtgate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Virtgate error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("VM not found: {0}")]
    VmNotFound(String),

    #[error("No console available for this VM")]
    NoConsoleAvailable,

    #[error("No usable console available for this VM")]
    NoUsableConsole,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token has already been used")]
    TokenAlreadyUsed,

    #[error("Maximum connections reached: {0}")]
    MaxConnectionsReached(String),

    #[error("Host {0} is not allowed")]
    Unauthorized(String),

    #[error("Failed to connect to console server at {addr}: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    #[error("Client stream error: {0}")]
    ClientStream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wire error code for the transport layer, matching the codes the
    /// management API exposes to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Error::VmNotFound(_) => "VM_NOT_FOUND",
            Error::NoConsoleAvailable | Error::NoUsableConsole => "NO_CONSOLE_AVAILABLE",
            Error::TokenInvalid => "INVALID_TOKEN",
            Error::TokenExpired => "TOKEN_EXPIRED",
            Error::TokenAlreadyUsed => "TOKEN_ALREADY_USED",
            Error::MaxConnectionsReached(_) => "MAX_CONNECTIONS_REACHED",
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::ConnectionFailed { .. } => "CONNECTION_FAILED",
            _ => "INTERNAL_ERROR",
        }
    }
}
