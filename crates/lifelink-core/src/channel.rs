//! Transport channel taxonomy

use serde::{Deserialize, Serialize};

/// One independent transport mechanism an alert can travel over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// HTTP uplink to the central dashboard
    Uplink,
    /// Classic short-range radio pairing (bonded devices + inquiry scan)
    ShortRangePairing,
    /// Local wireless group network (peer-to-peer group, LAN)
    LocalGroup,
    /// Soft access point hosted by this device
    SoftAccessPoint,
}

impl ChannelKind {
    /// All peer-fabric channels, in the order they are reported
    pub const PEER_FABRIC: [ChannelKind; 3] = [
        ChannelKind::ShortRangePairing,
        ChannelKind::LocalGroup,
        ChannelKind::SoftAccessPoint,
    ];

    /// Stable display name used in status strings and logs
    pub fn name(&self) -> &'static str {
        match self {
            ChannelKind::Uplink => "HTTP",
            ChannelKind::ShortRangePairing => "Bluetooth",
            ChannelKind::LocalGroup => "WiFi-Direct",
            ChannelKind::SoftAccessPoint => "WiFi-Hotspot",
        }
    }

    /// Whether this channel goes through the peer fabric rather than the uplink
    pub fn is_peer_fabric(&self) -> bool {
        !matches!(self, ChannelKind::Uplink)
    }

    /// Remediation shown when the channel's radio or network is switched off
    pub fn enable_hint(&self) -> &'static str {
        match self {
            ChannelKind::Uplink => "No internet connection. Connect to Wi-Fi or mobile data.",
            ChannelKind::ShortRangePairing => "Bluetooth is not enabled. Please turn on Bluetooth.",
            ChannelKind::LocalGroup => "Wi-Fi is not enabled. Please turn on Wi-Fi.",
            ChannelKind::SoftAccessPoint => {
                "Hotspot is unavailable. Turn on Wi-Fi and allow hotspot control."
            }
        }
    }

    /// Remediation shown when the channel's permissions are missing
    pub fn permission_hint(&self) -> &'static str {
        match self {
            ChannelKind::Uplink => "Network access permission is required.",
            ChannelKind::ShortRangePairing => {
                "Missing Bluetooth permissions. Grant Bluetooth connect and scan access."
            }
            ChannelKind::LocalGroup => {
                "Missing Wi-Fi permissions. Grant nearby-devices and location access."
            }
            ChannelKind::SoftAccessPoint => {
                "Missing hotspot permissions. Grant system-settings and location access."
            }
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_fabric_excludes_uplink() {
        assert!(!ChannelKind::Uplink.is_peer_fabric());
        assert!(ChannelKind::PEER_FABRIC.iter().all(|c| c.is_peer_fabric()));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(ChannelKind::ShortRangePairing.to_string(), "Bluetooth");
        assert_eq!(ChannelKind::Uplink.to_string(), "HTTP");
    }
}
