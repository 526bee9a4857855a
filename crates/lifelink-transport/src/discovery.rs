//! Discovery coordinator
//!
//! Runs at most one scan per link at a time. A call that arrives while a
//! scan is active returns an empty set immediately and leaves the running
//! scan alone. Whatever ends the scan (completion, timeout, cancellation or
//! the caller dropping the future) unsubscribes from the link and returns
//! the coordinator to idle.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use lifelink_core::{DiscoveryPhase, RelayEvent, RelayEvents};

use crate::directory::PeerDirectory;
use crate::link::{PeerLink, ScanSignal};
use crate::peer::PeerRecord;

/// Lifecycle of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DiscoveryState {
    Idle = 0,
    Scanning = 1,
    Finished = 2,
}

impl DiscoveryState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => DiscoveryState::Scanning,
            2 => DiscoveryState::Finished,
            _ => DiscoveryState::Idle,
        }
    }
}

/// Unsubscribes and resets state however the scan ends
struct ScanGuard<'a> {
    link: &'a dyn PeerLink,
    state: &'a AtomicU8,
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.link.stop_scan();
        self.state
            .store(DiscoveryState::Finished as u8, Ordering::SeqCst);
        self.state.store(DiscoveryState::Idle as u8, Ordering::SeqCst);
    }
}

/// Coordinates scans on one link and feeds the directory
pub struct DiscoveryCoordinator {
    link: Arc<dyn PeerLink>,
    directory: Arc<PeerDirectory>,
    events: RelayEvents,
    state: AtomicU8,
}

impl DiscoveryCoordinator {
    pub fn new(link: Arc<dyn PeerLink>, directory: Arc<PeerDirectory>, events: RelayEvents) -> Self {
        Self {
            link,
            directory,
            events,
            state: AtomicU8::new(DiscoveryState::Idle as u8),
        }
    }

    pub fn state(&self) -> DiscoveryState {
        DiscoveryState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_scanning(&self) -> bool {
        self.state() == DiscoveryState::Scanning
    }

    /// Load the link's bonded peers into the known pool
    pub async fn refresh_known(&self) -> usize {
        let bonded = self.link.bonded_peers().await;
        let count = bonded.len();
        for peer in bonded {
            self.directory.upsert_known(peer);
        }
        debug!(channel = %self.link.channel(), count, "Refreshed known peers");
        count
    }

    /// Scan for up to `timeout`, streaming every newly found peer to `found_tx`
    #[instrument(skip(self, cancel, found_tx), fields(channel = %self.link.channel()))]
    pub async fn discover(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
        found_tx: Option<mpsc::UnboundedSender<PeerRecord>>,
    ) -> HashSet<PeerRecord> {
        let mut found = HashSet::new();

        if self
            .state
            .compare_exchange(
                DiscoveryState::Idle as u8,
                DiscoveryState::Scanning as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            info!("Discovery already in progress, skipping");
            return found;
        }

        let _guard = ScanGuard {
            link: self.link.as_ref(),
            state: &self.state,
        };
        let channel = self.link.channel();
        self.events
            .emit(RelayEvent::discovery(channel, DiscoveryPhase::Started));

        let mut subscription = match self.link.start_scan().await {
            Ok(sub) => sub,
            Err(e) => {
                warn!(error = %e, "Failed to start scan");
                self.events.emit(RelayEvent::discovery(
                    channel,
                    DiscoveryPhase::Finished { found: 0 },
                ));
                return found;
            }
        };

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Discovery cancelled");
                    break;
                }
                _ = &mut deadline => {
                    debug!(timeout_ms = timeout.as_millis() as u64, "Discovery timed out");
                    break;
                }
                signal = subscription.recv() => match signal {
                    Some(ScanSignal::PeerFound(mut peer)) => {
                        peer.last_seen = Utc::now();
                        self.directory.insert_discovered(peer.clone());
                        if found.insert(peer.clone()) {
                            debug!(peer = %peer.label(), "Peer found");
                            self.events.emit(RelayEvent::discovery(
                                channel,
                                DiscoveryPhase::PeerFound { peer: peer.label() },
                            ));
                            if let Some(tx) = &found_tx {
                                let _ = tx.send(peer);
                            }
                        }
                    }
                    Some(ScanSignal::Finished) | None => {
                        debug!("Scan finished");
                        break;
                    }
                },
            }
        }

        info!(found = found.len(), "Discovery finished");
        self.events.emit(RelayEvent::discovery(
            channel,
            DiscoveryPhase::Finished { found: found.len() },
        ));
        found
    }
}
