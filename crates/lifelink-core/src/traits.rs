//! Collaborator interfaces the relay consumes from its host
//!
//! The relay never talks to the platform directly. Connectivity, location
//! and authorization are injected through these traits so that the same
//! orchestration runs on a device, in the node binary and in tests.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::channel::ChannelKind;

/// Geographic position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Kind of network currently backing the uplink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Wifi,
    Cellular,
    Ethernet,
    None,
}

/// Reports whether the dashboard uplink can be reached
pub trait ConnectivityProbe: Send + Sync {
    /// Whether the device has a validated internet connection
    fn is_online(&self) -> bool;

    /// Which network the connection runs over
    fn transport_kind(&self) -> TransportKind;

    /// Uplink is reachable iff online over a real transport
    fn uplink_reachable(&self) -> bool {
        self.is_online() && self.transport_kind() != TransportKind::None
    }
}

/// Supplies the last known device position
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn last_known_location(&self) -> Option<Coordinates>;
}

/// Answers whether the permissions a channel needs are granted
pub trait AuthorizationProbe: Send + Sync {
    fn has_required_permissions(&self, channel: ChannelKind) -> bool;
}

/// Connectivity fixed at construction
#[derive(Debug, Clone, Copy)]
pub struct StaticConnectivity {
    online: bool,
    kind: TransportKind,
}

impl StaticConnectivity {
    pub fn online(kind: TransportKind) -> Self {
        Self { online: true, kind }
    }

    pub fn offline() -> Self {
        Self {
            online: false,
            kind: TransportKind::None,
        }
    }
}

impl ConnectivityProbe for StaticConnectivity {
    fn is_online(&self) -> bool {
        self.online
    }

    fn transport_kind(&self) -> TransportKind {
        self.kind
    }
}

/// Location provider that never has a fix
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocation;

#[async_trait]
impl LocationProvider for NoLocation {
    async fn last_known_location(&self) -> Option<Coordinates> {
        None
    }
}

/// Location provider with a fixed position
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Coordinates);

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn last_known_location(&self) -> Option<Coordinates> {
        Some(self.0)
    }
}

/// Every channel is authorized
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantAll;

impl AuthorizationProbe for GrantAll {
    fn has_required_permissions(&self, _channel: ChannelKind) -> bool {
        true
    }
}

/// Every channel is authorized except the listed ones
#[derive(Debug, Clone, Default)]
pub struct DenyChannels(HashSet<ChannelKind>);

impl DenyChannels {
    pub fn new(channels: impl IntoIterator<Item = ChannelKind>) -> Self {
        Self(channels.into_iter().collect())
    }
}

impl AuthorizationProbe for DenyChannels {
    fn has_required_permissions(&self, channel: ChannelKind) -> bool {
        !self.0.contains(&channel)
    }
}
