//! Peer directory
//!
//! Owns the known and discovered pools for one channel. Only the discovery
//! coordinator creates or removes entries; delivery attempts may toggle the
//! connected marker of an existing entry and nothing else.

use dashmap::{DashMap, DashSet};
use tracing::debug;

use crate::peer::{PeerAddress, PeerPool, PeerRecord};

/// Concurrent store of the peers a channel can reach
#[derive(Debug, Default)]
pub struct PeerDirectory {
    known: DashMap<PeerAddress, PeerRecord>,
    discovered: DashMap<PeerAddress, PeerRecord>,
    connected: DashSet<PeerAddress>,
    claimed: DashSet<PeerAddress>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a known peer
    pub(crate) fn upsert_known(&self, mut record: PeerRecord) {
        record.pool = PeerPool::Known;
        self.known.insert(record.address.clone(), record);
    }

    /// Insert a discovered peer; returns `true` if it was not present yet
    pub(crate) fn insert_discovered(&self, mut record: PeerRecord) -> bool {
        record.pool = PeerPool::Discovered;
        let address = record.address.clone();
        self.discovered.insert(address, record).is_none()
    }

    /// Toggle the connected marker of an existing entry
    ///
    /// Unknown addresses are ignored; delivery never creates entries.
    pub(crate) fn set_connected(&self, address: &PeerAddress, connected: bool) {
        if !self.contains(address) {
            return;
        }
        if connected {
            self.connected.insert(address.clone());
        } else {
            self.connected.remove(address);
        }
    }

    pub fn contains(&self, address: &PeerAddress) -> bool {
        self.known.contains_key(address) || self.discovered.contains_key(address)
    }

    pub fn is_connected(&self, address: &PeerAddress) -> bool {
        self.connected.contains(address)
    }

    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    pub fn known(&self) -> Vec<PeerRecord> {
        self.known.iter().map(|e| e.value().clone()).collect()
    }

    pub fn discovered(&self) -> Vec<PeerRecord> {
        self.discovered.iter().map(|e| e.value().clone()).collect()
    }

    pub fn known_len(&self) -> usize {
        self.known.len()
    }

    pub fn discovered_len(&self) -> usize {
        self.discovered.len()
    }

    /// Union of both pools; a peer in both is reported once, as known
    pub fn targets(&self) -> Vec<PeerRecord> {
        let mut out = self.known();
        out.extend(
            self.discovered
                .iter()
                .filter(|e| !self.known.contains_key(e.key()))
                .map(|e| e.value().clone()),
        );
        out
    }

    /// Reserve a peer for this session
    ///
    /// Returns `true` for exactly one caller per address until the next
    /// [`begin_session`](Self::begin_session).
    pub fn claim(&self, address: &PeerAddress) -> bool {
        self.claimed.insert(address.clone())
    }

    pub fn is_claimed(&self, address: &PeerAddress) -> bool {
        self.claimed.contains(address)
    }

    /// Start a new broadcast session: forget discovered peers and claims
    pub fn begin_session(&self) {
        debug!(
            discovered = self.discovered.len(),
            claimed = self.claimed.len(),
            "Resetting peer session state"
        );
        self.discovered.clear();
        self.claimed.clear();
        self.connected.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(n: &str) -> PeerAddress {
        PeerAddress::Named(n.to_string())
    }

    #[test]
    fn test_targets_union_without_merge() {
        let dir = PeerDirectory::new();
        dir.upsert_known(PeerRecord::known("A", named("a")));
        dir.insert_discovered(PeerRecord::discovered("B", named("b")));
        dir.insert_discovered(PeerRecord::discovered("A again", named("a")));

        assert_eq!(dir.known_len(), 1);
        assert_eq!(dir.discovered_len(), 2);

        let targets = dir.targets();
        assert_eq!(targets.len(), 2);
        let a = targets.iter().find(|p| p.address == named("a")).unwrap();
        assert_eq!(a.pool, PeerPool::Known);
    }

    #[test]
    fn test_claim_once_per_session() {
        let dir = PeerDirectory::new();
        assert!(dir.claim(&named("a")));
        assert!(!dir.claim(&named("a")));

        dir.begin_session();
        assert!(dir.claim(&named("a")));
    }

    #[test]
    fn test_begin_session_keeps_known() {
        let dir = PeerDirectory::new();
        dir.upsert_known(PeerRecord::known("A", named("a")));
        dir.insert_discovered(PeerRecord::discovered("B", named("b")));
        dir.begin_session();

        assert_eq!(dir.known_len(), 1);
        assert_eq!(dir.discovered_len(), 0);
    }

    #[test]
    fn test_connected_marker_requires_entry() {
        let dir = PeerDirectory::new();
        dir.set_connected(&named("ghost"), true);
        assert!(!dir.is_connected(&named("ghost")));
        assert!(!dir.contains(&named("ghost")));

        dir.upsert_known(PeerRecord::known("A", named("a")));
        dir.set_connected(&named("a"), true);
        assert!(dir.is_connected(&named("a")));
        dir.set_connected(&named("a"), false);
        assert_eq!(dir.connected_count(), 0);
    }

    #[test]
    fn test_insert_discovered_reports_novelty() {
        let dir = PeerDirectory::new();
        assert!(dir.insert_discovered(PeerRecord::discovered("B", named("b"))));
        assert!(!dir.insert_discovered(PeerRecord::discovered("B", named("b"))));
    }
}
