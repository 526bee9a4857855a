//! Relay events published to the host
//!
//! UI and notification code observe the relay through a
//! [`tokio::sync::broadcast`] channel. Publishing never blocks and never
//! fails when nobody is subscribed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::channel::ChannelKind;

/// Default capacity of the event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Phase of a discovery run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryPhase {
    /// Scan started
    Started,
    /// A peer answered the scan
    PeerFound { peer: String },
    /// Scan ended (completion, timeout or cancellation)
    Finished { found: usize },
}

/// Things that happen inside the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelayEvent {
    /// Discovery progress on one channel
    DiscoveryProgress {
        channel: ChannelKind,
        phase: DiscoveryPhase,
        timestamp: DateTime<Utc>,
    },

    /// One channel finished its part of a broadcast
    ChannelProgress {
        channel: ChannelKind,
        success: bool,
        delivered: usize,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A multi-channel broadcast started
    TransmissionStarted {
        message_id: String,
        channels: Vec<ChannelKind>,
        timestamp: DateTime<Utc>,
    },

    /// A multi-channel broadcast finished; always the last event of a session
    TransmissionComplete {
        message_id: String,
        total_reached: usize,
        channels_succeeded: usize,
        timestamp: DateTime<Utc>,
    },

    /// A user-visible failure
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A new alert arrived from a peer
    MessageReceived {
        message_id: String,
        original_sender: String,
        relay_count: u32,
        timestamp: DateTime<Utc>,
    },

    /// A received alert was passed on
    RelayForwarded {
        message_id: String,
        channel: ChannelKind,
        reached: usize,
        timestamp: DateTime<Utc>,
    },
}

impl RelayEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::DiscoveryProgress { timestamp, .. } => *timestamp,
            Self::ChannelProgress { timestamp, .. } => *timestamp,
            Self::TransmissionStarted { timestamp, .. } => *timestamp,
            Self::TransmissionComplete { timestamp, .. } => *timestamp,
            Self::Error { timestamp, .. } => *timestamp,
            Self::MessageReceived { timestamp, .. } => *timestamp,
            Self::RelayForwarded { timestamp, .. } => *timestamp,
        }
    }

    pub fn discovery(channel: ChannelKind, phase: DiscoveryPhase) -> Self {
        Self::DiscoveryProgress {
            channel,
            phase,
            timestamp: Utc::now(),
        }
    }

    pub fn channel_progress(
        channel: ChannelKind,
        success: bool,
        delivered: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::ChannelProgress {
            channel,
            success,
            delivered,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn transmission_started(message_id: impl Into<String>, channels: Vec<ChannelKind>) -> Self {
        Self::TransmissionStarted {
            message_id: message_id.into(),
            channels,
            timestamp: Utc::now(),
        }
    }

    pub fn transmission_complete(
        message_id: impl Into<String>,
        total_reached: usize,
        channels_succeeded: usize,
    ) -> Self {
        Self::TransmissionComplete {
            message_id: message_id.into(),
            total_reached,
            channels_succeeded,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn message_received(
        message_id: impl Into<String>,
        original_sender: impl Into<String>,
        relay_count: u32,
    ) -> Self {
        Self::MessageReceived {
            message_id: message_id.into(),
            original_sender: original_sender.into(),
            relay_count,
            timestamp: Utc::now(),
        }
    }

    pub fn relay_forwarded(message_id: impl Into<String>, channel: ChannelKind, reached: usize) -> Self {
        Self::RelayForwarded {
            message_id: message_id.into(),
            channel,
            reached,
            timestamp: Utc::now(),
        }
    }
}

/// Cloneable publisher for [`RelayEvent`]s
#[derive(Debug, Clone)]
pub struct RelayEvents {
    tx: broadcast::Sender<RelayEvent>,
}

impl RelayEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; dropped when nobody listens
    pub fn emit(&self, event: RelayEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for RelayEvents {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
