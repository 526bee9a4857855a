//! # LifeLink Relay
//!
//! Store-and-forward relay for emergency alerts.
//!
//! When the dashboard uplink is unavailable, alerts hop device to device
//! over whatever peer-fabric channels are up, with loop prevention and a
//! bounded hop count. Any device that regains the uplink forwards the alert
//! to the dashboard.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lifelink_core::{AlertEnvelope, StaticConnectivity, TransportKind};
//! use lifelink_relay::{RelayConfig, RelayOrchestrator};
//! use lifelink_transport::{TcpLink, TcpLinkConfig};
//!
//! let relay = RelayOrchestrator::builder()
//!     .with_config(RelayConfig::default())
//!     .with_connectivity(Arc::new(StaticConnectivity::offline()))
//!     .with_link(Arc::new(TcpLink::new(TcpLinkConfig::default())))
//!     .build();
//!
//! let alert = AlertEnvelope::builder("Alice").phone("+15550100").build_checked()?;
//! let outcome = relay.send_alert(alert).await?;
//! ```
//!
//! ## Architecture
//!
//! - [`ledger`]: Dedup ledger of already-processed message ids
//! - [`channel_relay`]: Outbound broadcast over a single peer link
//! - [`broadcaster`]: Parallel fan-out over every usable channel
//! - [`orchestrator`]: Inbound handling, outbound sessions and the origin send path
//! - [`report`]: Per-channel results and the aggregate report
//! - [`status`]: Bounded in-memory history of alert outcomes
//! - [`error`]: Relay error types

pub mod broadcaster;
pub mod channel_relay;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod report;
pub mod status;

// Re-export main types
pub use broadcaster::{BroadcastOptions, MultiChannelBroadcaster};
pub use channel_relay::ChannelRelay;
pub use error::{RelayError, RelayResult};
pub use ledger::{DedupLedger, LedgerMode};
pub use orchestrator::{InboundDisposition, RelayOrchestrator, RelayOrchestratorBuilder, SendOutcome};
pub use report::{AggregateReport, ChannelResult, MAX_LISTED_FAILURES};
pub use status::{DeliveryMethod, MessageState, StatusEntry, StatusLog};

pub use lifelink_transport::DeliveryConfig;

use std::time::Duration;

use lifelink_core::{ChannelKind, MAX_HOPS};
use serde::{Deserialize, Serialize};

/// Timing for one peer-fabric channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// How long a discovery scan may run
    pub discovery_timeout_ms: u64,
    /// Time after which the channel stops starting deliveries and cancels
    /// those in flight; finished deliveries still count
    pub window_ms: u64,
}

impl ChannelConfig {
    pub const fn new(discovery_timeout_ms: u64, window_ms: u64) -> Self {
        Self {
            discovery_timeout_ms,
            window_ms,
        }
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Configuration for the relay
///
/// Loadable from TOML; every field falls back to its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Hop ceiling; envelopes at or above it are dropped
    pub max_hops: u32,
    /// When the dedup ledger is cleared
    pub ledger_mode: LedgerMode,
    /// Age after which ledger entries expire in [`LedgerMode::Expiring`]
    pub seen_timeout_ms: u64,
    /// Per-peer retry and timeout settings
    pub delivery: DeliveryConfig,
    /// Short-range pairing channel
    pub short_range: ChannelConfig,
    /// Local group network channel
    pub local_group: ChannelConfig,
    /// Soft access point channel
    pub soft_access_point: ChannelConfig,
    /// Request timeout for the dashboard POST
    pub uplink_timeout_ms: u64,
    /// Hard limit on the uplink channel task in a broadcast
    pub uplink_window_ms: u64,
    /// Capacity of the event channel
    pub event_capacity: usize,
    /// Entries kept in the status log
    pub status_history: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_hops: MAX_HOPS,
            ledger_mode: LedgerMode::Expiring,
            seen_timeout_ms: 3_600_000,
            delivery: DeliveryConfig::default(),
            short_range: ChannelConfig::new(15_000, 30_000),
            local_group: ChannelConfig::new(25_000, 30_000),
            soft_access_point: ChannelConfig::new(35_000, 40_000),
            uplink_timeout_ms: 5_000,
            uplink_window_ms: 15_000,
            event_capacity: 256,
            status_history: 50,
        }
    }
}

impl RelayConfig {
    /// Millisecond timings for tests and simulations
    pub fn testing() -> Self {
        Self {
            seen_timeout_ms: 60_000,
            delivery: DeliveryConfig::testing(),
            short_range: ChannelConfig::new(50, 2_000),
            local_group: ChannelConfig::new(50, 2_000),
            soft_access_point: ChannelConfig::new(50, 2_000),
            uplink_timeout_ms: 500,
            uplink_window_ms: 2_000,
            ..Self::default()
        }
    }

    /// Choose when the dedup ledger is cleared
    pub fn with_ledger_mode(mut self, mode: LedgerMode) -> Self {
        self.ledger_mode = mode;
        self
    }

    /// Timing for a channel; the uplink has no discovery phase
    pub fn channel(&self, kind: ChannelKind) -> ChannelConfig {
        match kind {
            ChannelKind::ShortRangePairing => self.short_range.clone(),
            ChannelKind::LocalGroup => self.local_group.clone(),
            ChannelKind::SoftAccessPoint => self.soft_access_point.clone(),
            ChannelKind::Uplink => ChannelConfig::new(0, self.uplink_window_ms),
        }
    }

    pub fn seen_timeout(&self) -> Duration {
        Duration::from_millis(self.seen_timeout_ms)
    }

    pub fn uplink_timeout(&self) -> Duration {
        Duration::from_millis(self.uplink_timeout_ms)
    }

    pub fn uplink_window(&self) -> Duration {
        Duration::from_millis(self.uplink_window_ms)
    }

    /// Validate configuration invariants
    ///
    /// An empty list means the configuration is valid.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.max_hops == 0 {
            warnings.push(ConfigWarning::ZeroMaxHops);
        }

        if self.delivery.max_attempts == 0 || self.delivery.write_attempts == 0 {
            warnings.push(ConfigWarning::NoDeliveryAttempts);
        }

        if self.delivery.connect_timeout_ms == 0 {
            warnings.push(ConfigWarning::ZeroConnectTimeout);
        }

        for kind in ChannelKind::PEER_FABRIC {
            let channel = self.channel(kind);
            if channel.discovery_timeout_ms >= channel.window_ms {
                warnings.push(ConfigWarning::DiscoveryExceedsWindow(kind));
            }
            if channel.window() < self.delivery.unreachable_peer_budget() {
                warnings.push(ConfigWarning::WindowBelowDeliveryBudget(kind));
            }
        }

        if self.uplink_timeout_ms > self.uplink_window_ms {
            warnings.push(ConfigWarning::UplinkTimeoutExceedsWindow);
        }

        if self.ledger_mode == LedgerMode::Expiring && self.seen_timeout_ms < 1_000 {
            warnings.push(ConfigWarning::SeenTimeoutTooShort);
        }

        warnings
    }

    /// Check if the configuration is valid (no warnings)
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

/// Configuration warnings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Every received envelope would be dropped
    ZeroMaxHops,
    /// A delivery would never be attempted
    NoDeliveryAttempts,
    /// Every connect would time out immediately
    ZeroConnectTimeout,
    /// Discovery cannot finish inside the channel window
    DiscoveryExceedsWindow(ChannelKind),
    /// An unreachable known peer is cut off before its retries run out
    WindowBelowDeliveryBudget(ChannelKind),
    /// The uplink request outlives its channel window
    UplinkTimeoutExceedsWindow,
    /// Ledger entries expire before echoes can arrive (< 1s)
    SeenTimeoutTooShort,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::ZeroMaxHops => write!(f, "max_hops is 0"),
            ConfigWarning::NoDeliveryAttempts => {
                write!(f, "delivery max_attempts or write_attempts is 0")
            }
            ConfigWarning::ZeroConnectTimeout => write!(f, "delivery connect_timeout_ms is 0"),
            ConfigWarning::DiscoveryExceedsWindow(kind) => {
                write!(f, "{kind} discovery_timeout_ms is not below window_ms")
            }
            ConfigWarning::WindowBelowDeliveryBudget(kind) => write!(
                f,
                "{kind} window_ms is shorter than the retry budget of one unreachable peer"
            ),
            ConfigWarning::UplinkTimeoutExceedsWindow => {
                write!(f, "uplink_timeout_ms exceeds uplink_window_ms")
            }
            ConfigWarning::SeenTimeoutTooShort => write!(f, "seen_timeout_ms is very short (< 1s)"),
        }
    }
}
