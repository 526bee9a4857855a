//! Relay error types
//!
//! Failures of a single peer or channel are data inside the reports. Only
//! precondition failures and total failures surface as errors.

use lifelink_core::{ChannelKind, EnvelopeError};
use thiserror::Error;

use crate::report::AggregateReport;

/// Errors that can occur in the relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// A channel cannot run; the remediation is user-actionable
    #[error("{remediation}")]
    Precondition {
        channel: ChannelKind,
        remediation: String,
    },

    /// A channel had nobody to deliver to
    #[error("No paired or discoverable devices found.")]
    NoPeersReachable { channel: ChannelKind },

    /// No channel was usable at all
    #[error("No transmission channels available. Enable Bluetooth, Wi-Fi or mobile data.")]
    NoChannels,

    /// Every usable channel reached nobody
    #[error("Failed to reach any device on {} channel(s)", .0.results.len())]
    NothingDelivered(AggregateReport),

    /// Another alert is already being sent from this device
    #[error("An alert is already being sent")]
    SendInProgress,

    /// The session was cancelled
    #[error("Relay session cancelled")]
    Cancelled,

    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
}

impl RelayError {
    /// The aggregate report, if the error carries one
    pub fn report(&self) -> Option<&AggregateReport> {
        match self {
            RelayError::NothingDelivered(report) => Some(report),
            _ => None,
        }
    }
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
