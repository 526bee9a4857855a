//! # LifeLink Transport
//!
//! Peer-fabric transports and the dashboard uplink.
//!
//! Provides the per-channel building blocks the relay composes: a peer
//! directory, a discovery coordinator, the per-peer delivery state machine
//! and concrete links.
//!
//! ## Features
//!
//! - [`PeerLink`] abstraction with ranked [`ConnectionStrategy`]s
//! - Single-flight discovery with guaranteed unsubscribe
//! - Delivery with bounded retries, hard timeouts and exactly-once handle release
//! - TCP link and inbound listener for local-group networks
//! - HTTP uplink via `reqwest`
//! - Scriptable [`MockLink`] and [`MockUplink`] for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lifelink_transport::{DeliveryAttempt, DeliveryConfig, PeerDirectory, TcpLink, TcpLinkConfig};
//!
//! let link = Arc::new(TcpLink::new(TcpLinkConfig::default()));
//! let directory = Arc::new(PeerDirectory::new());
//! let delivery = DeliveryAttempt::new(link, directory, DeliveryConfig::default());
//! let outcome = delivery.deliver(&peer, &payload, &cancel).await;
//! ```

pub mod delivery;
pub mod directory;
pub mod discovery;
pub mod error;
pub mod link;
pub mod mock;
pub mod peer;
pub mod tcp;
pub mod uplink;

// Re-export main types
pub use delivery::{DeliveryAttempt, DeliveryConfig, DeliveryOutcome, DeliveryState, HandleGuard};
pub use directory::PeerDirectory;
pub use discovery::{DiscoveryCoordinator, DiscoveryState};
pub use error::{LinkError, UplinkError};
pub use link::{
    ChannelHandle, ConnectionStrategy, MAX_STRATEGIES, PeerLink, ScanSignal, ScanSubscription,
};
pub use mock::{MockBehavior, MockLink, MockLinkStats, MockUplink};
pub use peer::{PeerAddress, PeerPool, PeerRecord};
pub use tcp::{GROUP_OWNER_ADDR, TcpHandle, TcpInbound, TcpLink, TcpLinkConfig, TcpPeer};
pub use uplink::{DEFAULT_UPLINK_TIMEOUT, HttpUplink, UPLINK_USER_AGENT, Uplink};
