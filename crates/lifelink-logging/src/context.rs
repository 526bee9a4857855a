//! Node context for multi-instance logging
//!
//! Several nodes may log into the same sink (simulations, loopback tests).
//! Running a node's work inside its [`NodeContext::span`] tags every event
//! with the node name and a per-process session id.

use tracing::Span;
use uuid::Uuid;

/// Identity of the node that is logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContext {
    pub node: String,
    /// Unique per process start
    pub session_id: Uuid,
}

impl NodeContext {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            session_id: Uuid::new_v4(),
        }
    }

    /// Keep a session id across restarts
    pub fn with_session_id(node: impl Into<String>, session_id: Uuid) -> Self {
        Self {
            node: node.into(),
            session_id,
        }
    }

    /// Root span carrying `node` and `session`
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "node",
            node = %self.node,
            session = %self.session_id.as_simple()
        )
    }
}

/// Field names used across the LifeLink crates
///
/// Log consumers key on these when filtering JSONL output.
pub mod fields {
    pub const NODE: &str = "node";
    pub const SESSION: &str = "session";
    pub const MESSAGE_ID: &str = "message_id";
    pub const ORIGINAL_SENDER: &str = "sender";
    pub const RELAY_COUNT: &str = "relay_count";
    pub const CHANNEL: &str = "channel";
    pub const PEER: &str = "peer";
    pub const ATTEMPT: &str = "attempt";
    pub const DELIVERED: &str = "delivered";
    pub const TOTAL_REACHED: &str = "total_reached";
}
