//! Error types for LifeLink core

use thiserror::Error;

/// Errors related to the alert envelope and its wire format
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Failed to encode envelope: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for EnvelopeError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            EnvelopeError::Malformed(e.to_string())
        } else {
            EnvelopeError::Encode(e.to_string())
        }
    }
}

/// Result type for envelope operations
pub type EnvelopeResult<T> = Result<T, EnvelopeError>;
