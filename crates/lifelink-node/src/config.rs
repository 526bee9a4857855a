//! Configuration for the relay node
//!
//! Loaded from a TOML file. Every section is optional.
//!
//! ```toml
//! name = "responder-7"
//! phone = "+15550100"
//! dashboard_url = "https://dashboard.example/api/alerts"
//! listen_addr = "0.0.0.0:8888"
//!
//! [location]
//! latitude = 12.97
//! longitude = 77.59
//!
//! [link]
//! channel = "local_group"
//! scan_candidates = ["192.168.49.12:8888"]
//!
//! [[link.peers]]
//! name = "shelter-gateway"
//! address = "192.168.49.20:8888"
//!
//! [relay]
//! max_hops = 5
//!
//! [logging]
//! default_level = "info"
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use lifelink_core::{ChannelKind, Coordinates};
use lifelink_logging::LogConfig;
use lifelink_relay::RelayConfig;
use lifelink_transport::{GROUP_OWNER_ADDR, PeerAddress, TcpLinkConfig, TcpPeer};

use crate::error::{NodeError, NodeResult};

/// Default port for inbound alerts
pub const DEFAULT_PORT: u16 = 8888;

/// Configuration for a [`LifelinkNode`](crate::LifelinkNode)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Sender name put on originated alerts
    pub name: String,
    /// Sender phone put on originated alerts
    pub phone: Option<String>,
    /// Dashboard endpoint; no uplink when unset
    pub dashboard_url: Option<String>,
    /// Whether the host currently has internet access
    pub assume_online: bool,
    /// Address the inbound listener binds to
    pub listen_addr: SocketAddr,
    /// Fixed position used when an alert has none
    pub location: Option<Coordinates>,
    pub link: LinkSection,
    pub relay: RelayConfig,
    pub logging: LogConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "LifeLink".to_string(),
            phone: None,
            dashboard_url: None,
            assume_online: true,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            location: None,
            link: LinkSection::default(),
            relay: RelayConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

/// TCP peer link settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    /// Channel the TCP link reports as
    pub channel: ChannelKind,
    /// Peers always targeted
    pub peers: Vec<PeerEntry>,
    /// Addresses probed during discovery
    pub scan_candidates: Vec<SocketAddr>,
    pub probe_timeout_ms: u64,
    /// Fallback target; `None` disables it
    pub group_owner: Option<SocketAddr>,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            channel: ChannelKind::LocalGroup,
            peers: Vec::new(),
            scan_candidates: Vec::new(),
            probe_timeout_ms: 500,
            group_owner: Some(GROUP_OWNER_ADDR),
        }
    }
}

/// A configured peer; `address` is `ip:port` or `host:port`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub name: String,
    pub address: String,
}

impl PeerEntry {
    fn to_tcp_peer(&self) -> TcpPeer {
        let address = match self.address.parse::<SocketAddr>() {
            Ok(addr) => PeerAddress::Socket(addr),
            Err(_) => PeerAddress::Host(self.address.clone()),
        };
        TcpPeer {
            name: self.name.clone(),
            address,
        }
    }
}

impl NodeConfig {
    /// Load and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> NodeResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> NodeResult<Self> {
        let config: NodeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the node cannot run with
    pub fn validate(&self) -> NodeResult<()> {
        if self.name.trim().is_empty() {
            return Err(NodeError::Config("name must not be empty".into()));
        }
        if self.link.channel == ChannelKind::Uplink {
            return Err(NodeError::Config(
                "link.channel must be a peer-fabric channel".into(),
            ));
        }
        if let Some(url) = &self.dashboard_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(NodeError::Config(format!(
                "dashboard_url must be http(s): {url}"
            )));
        }
        if let Some(peer) = self.link.peers.iter().find(|p| p.address.trim().is_empty()) {
            return Err(NodeError::Config(format!(
                "peer {} has no address",
                peer.name
            )));
        }
        Ok(())
    }

    /// Settings for the node's TCP link
    pub fn tcp_link(&self) -> TcpLinkConfig {
        TcpLinkConfig {
            channel: self.link.channel,
            peers: self.link.peers.iter().map(PeerEntry::to_tcp_peer).collect(),
            scan_candidates: self.link.scan_candidates.clone(),
            probe_timeout: Duration::from_millis(self.link.probe_timeout_ms),
            group_owner: self.link.group_owner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifelink_relay::LedgerMode;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.listen_addr.port(), DEFAULT_PORT);
        assert!(config.dashboard_url.is_none());
        assert_eq!(config.link.group_owner, Some(GROUP_OWNER_ADDR));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_file() {
        let config = NodeConfig::from_toml_str(
            r#"
            name = "responder-7"
            phone = "+15550100"
            dashboard_url = "https://dashboard.example/api/alerts"
            assume_online = false
            listen_addr = "127.0.0.1:9000"

            [location]
            latitude = 12.97
            longitude = 77.59

            [link]
            channel = "soft_access_point"
            scan_candidates = ["10.0.0.5:8888"]

            [[link.peers]]
            name = "gateway"
            address = "10.0.0.2:8888"

            [[link.peers]]
            name = "shelter"
            address = "shelter.local:8888"

            [relay]
            ledger_mode = "session_reset"

            [logging]
            default_level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.name, "responder-7");
        assert!(!config.assume_online);
        assert_eq!(config.location, Some(Coordinates::new(12.97, 77.59)));
        assert_eq!(config.relay.ledger_mode, LedgerMode::SessionReset);
        assert_eq!(config.logging.default_level, "debug");

        let link = config.tcp_link();
        assert_eq!(link.channel, ChannelKind::SoftAccessPoint);
        assert_eq!(
            link.peers[0].address,
            PeerAddress::Socket("10.0.0.2:8888".parse().unwrap())
        );
        assert_eq!(
            link.peers[1].address,
            PeerAddress::Host("shelter.local:8888".to_string())
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "name = \"bravo\"\nlisten_addr = \"127.0.0.1:0\"\n").unwrap();

        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.name, "bravo");
        assert_eq!(config.listen_addr.port(), 0);

        let missing = NodeConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, NodeError::Io(_)));
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = NodeConfig::from_toml_str(r#"dashboard_url = "ftp://example""#).unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));

        let err = NodeConfig::from_toml_str(
            r#"
            [link]
            channel = "uplink"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));

        let err = NodeConfig::from_toml_str("listen_addr = 5").unwrap_err();
        assert!(matches!(err, NodeError::Parse(_)));
    }
}
