//! Error types for the relay node

use thiserror::Error;

use lifelink_logging::LoggingError;
use lifelink_relay::RelayError;
use lifelink_transport::UplinkError;

/// Errors that can occur in the relay node
#[derive(Debug, Error)]
pub enum NodeError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Config file could not be parsed
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Dashboard client could not be built
    #[error("Uplink error: {0}")]
    Uplink(#[from] UplinkError),

    /// Relay failure while sending
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("Logging setup failed: {0}")]
    Logging(#[from] LoggingError),

    #[error("Node not started")]
    NotStarted,

    #[error("Node already started")]
    AlreadyStarted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for node operations
pub type NodeResult<T> = Result<T, NodeError>;
