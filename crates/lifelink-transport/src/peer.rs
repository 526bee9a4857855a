//! Peer addressing and records

use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport-specific address of a peer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerAddress {
    /// Resolved socket address
    Socket(SocketAddr),
    /// `host:port` resolved at connect time
    Host(String),
    /// Opaque link-level identifier (radio address, simulated peer)
    Named(String),
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerAddress::Socket(addr) => write!(f, "{addr}"),
            PeerAddress::Host(host) => f.write_str(host),
            PeerAddress::Named(name) => f.write_str(name),
        }
    }
}

/// Which pool of the directory a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerPool {
    /// Previously paired or configured peers
    Known,
    /// Found by a scan during the current session
    Discovered,
}

/// A peer the relay may deliver to
///
/// Identity is the address: two records with the same address are the same
/// peer regardless of name, pool or last-seen time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub address: PeerAddress,
    pub name: String,
    pub pool: PeerPool,
    pub last_seen: DateTime<Utc>,
}

impl PeerRecord {
    pub fn known(name: impl Into<String>, address: PeerAddress) -> Self {
        Self {
            address,
            name: name.into(),
            pool: PeerPool::Known,
            last_seen: Utc::now(),
        }
    }

    pub fn discovered(name: impl Into<String>, address: PeerAddress) -> Self {
        Self {
            address,
            name: name.into(),
            pool: PeerPool::Discovered,
            last_seen: Utc::now(),
        }
    }

    /// Display name, falling back to the address when blank
    pub fn label(&self) -> String {
        if self.name.trim().is_empty() {
            self.address.to_string()
        } else {
            self.name.clone()
        }
    }
}

impl PartialEq for PeerRecord {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for PeerRecord {}

impl Hash for PeerRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_is_address() {
        let a = PeerRecord::known("Phone A", PeerAddress::Named("aa:bb".into()));
        let b = PeerRecord::discovered("renamed", PeerAddress::Named("aa:bb".into()));
        assert_eq!(a, b);

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_label_falls_back_to_address() {
        let rec = PeerRecord::discovered(" ", PeerAddress::Host("relay.local:8888".into()));
        assert_eq!(rec.label(), "relay.local:8888");
    }
}
