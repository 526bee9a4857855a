//! Transport layer error types

use thiserror::Error;

/// Errors raised by a peer link while reaching one peer
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Connection timed out after {timeout_ms} ms")]
    ConnectTimeout { timeout_ms: u64 },

    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("No connection strategy produced a handle")]
    NoHandle,

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Link unavailable: {0}")]
    Unavailable(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Authorization failures abort the peer without retry
    pub fn is_permission_denied(&self) -> bool {
        match self {
            LinkError::PermissionDenied(_) => true,
            LinkError::Io(e) => e.kind() == std::io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }

    /// Map a socket-level failure during connect
    pub fn from_connect_io(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            LinkError::PermissionDenied(e.to_string())
        } else {
            LinkError::ConnectFailed(e.to_string())
        }
    }

    /// Map a socket-level failure during write
    pub fn from_write_io(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            LinkError::PermissionDenied(e.to_string())
        } else {
            LinkError::WriteFailed(e.to_string())
        }
    }
}

/// Errors posting an alert to the dashboard
#[derive(Debug, Error)]
pub enum UplinkError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: {code} - Response: {body}")]
    Status { code: u16, body: String },

    #[error("Failed to encode alert: {0}")]
    Encode(String),
}

impl From<reqwest::Error> for UplinkError {
    fn from(e: reqwest::Error) -> Self {
        UplinkError::Network(e.to_string())
    }
}

impl From<lifelink_core::EnvelopeError> for UplinkError {
    fn from(e: lifelink_core::EnvelopeError) -> Self {
        UplinkError::Encode(e.to_string())
    }
}
