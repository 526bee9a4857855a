//! Peer link abstractions
//!
//! A [`PeerLink`] is one peer-fabric transport (short-range radio, local
//! group network, soft access point). It knows which peers are bonded, can
//! scan for new ones, and offers a ranked list of [`ConnectionStrategy`]s
//! that each may produce a [`ChannelHandle`] to a peer.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use lifelink_core::ChannelKind;

use crate::error::LinkError;
use crate::peer::PeerRecord;

/// Maximum number of ranked strategies tried per connect
pub const MAX_STRATEGIES: usize = 3;

/// An open-able byte channel to a single peer
///
/// Exclusively owned by the delivery task that created it.
#[async_trait]
pub trait ChannelHandle: Send {
    /// Establish the connection
    async fn connect(&mut self) -> Result<(), LinkError>;

    /// Write one complete payload
    async fn write(&mut self, payload: &[u8]) -> Result<(), LinkError>;

    /// Gracefully release the handle
    async fn close(&mut self) -> Result<(), LinkError>;

    /// Release the handle without waiting; used when the owner is dropped
    fn abort(&mut self);
}

/// One way of obtaining a handle to a peer
#[async_trait]
pub trait ConnectionStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` means the strategy does not apply to this peer
    async fn open(&self, peer: &PeerRecord) -> Result<Option<Box<dyn ChannelHandle>>, LinkError>;
}

/// Signal delivered while a scan runs
#[derive(Debug, Clone)]
pub enum ScanSignal {
    PeerFound(PeerRecord),
    Finished,
}

/// Receiving end of a running scan
#[derive(Debug)]
pub struct ScanSubscription {
    rx: mpsc::Receiver<ScanSignal>,
}

impl ScanSubscription {
    /// Create a subscription and the sender the link feeds
    pub fn channel(buffer: usize) -> (mpsc::Sender<ScanSignal>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { rx })
    }

    /// Next signal; `None` once the scanner side is gone
    pub async fn recv(&mut self) -> Option<ScanSignal> {
        self.rx.recv().await
    }
}

/// One peer-fabric transport
#[async_trait]
pub trait PeerLink: Send + Sync {
    fn channel(&self) -> ChannelKind;

    /// Whether the underlying radio or network is switched on
    fn is_enabled(&self) -> bool;

    /// Previously paired or configured peers
    async fn bonded_peers(&self) -> Vec<PeerRecord>;

    /// Begin scanning; found peers and completion arrive on the subscription
    async fn start_scan(&self) -> Result<ScanSubscription, LinkError>;

    /// Stop any running scan. Must not block; called from drop guards.
    fn stop_scan(&self);

    /// Connection strategies in priority order
    fn strategies(&self) -> Vec<Arc<dyn ConnectionStrategy>>;

    /// Free resources a previous operation may hold for this peer
    async fn release_prior(&self, peer: &PeerRecord);

    /// Close every stale handle left over from earlier sessions
    async fn release_all(&self);
}
