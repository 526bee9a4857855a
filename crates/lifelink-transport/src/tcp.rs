//! Local-group network link over TCP
//!
//! Each delivery opens one connection, writes one JSON document and
//! half-closes. The inbound side reads until the peer half-closes and hands
//! the raw bytes to the caller.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lifelink_core::ChannelKind;

use crate::error::LinkError;
use crate::link::{ChannelHandle, ConnectionStrategy, PeerLink, ScanSignal, ScanSubscription};
use crate::peer::{PeerAddress, PeerRecord};

/// Conventional address of a peer-to-peer group owner
pub const GROUP_OWNER_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 49, 1), 8888));

/// Largest inbound payload accepted
pub const MAX_INBOUND_PAYLOAD: usize = 64 * 1024;

/// A configured TCP peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpPeer {
    pub name: String,
    pub address: PeerAddress,
}

/// Settings for a [`TcpLink`]
#[derive(Debug, Clone)]
pub struct TcpLinkConfig {
    /// Channel this link reports as
    pub channel: ChannelKind,
    /// Peers loaded into the known pool
    pub peers: Vec<TcpPeer>,
    /// Addresses probed during a scan
    pub scan_candidates: Vec<SocketAddr>,
    /// Connect timeout for one probe
    pub probe_timeout: Duration,
    /// Fallback target when no direct address applies
    pub group_owner: Option<SocketAddr>,
}

impl Default for TcpLinkConfig {
    fn default() -> Self {
        Self {
            channel: ChannelKind::LocalGroup,
            peers: Vec::new(),
            scan_candidates: Vec::new(),
            probe_timeout: Duration::from_millis(500),
            group_owner: Some(GROUP_OWNER_ADDR),
        }
    }
}

enum TcpTarget {
    Socket(SocketAddr),
    Host(String),
}

/// One outbound connection carrying one payload
pub struct TcpHandle {
    target: TcpTarget,
    stream: Option<TcpStream>,
}

impl TcpHandle {
    fn socket(addr: SocketAddr) -> Self {
        Self {
            target: TcpTarget::Socket(addr),
            stream: None,
        }
    }

    fn host(host: String) -> Self {
        Self {
            target: TcpTarget::Host(host),
            stream: None,
        }
    }
}

#[async_trait]
impl ChannelHandle for TcpHandle {
    async fn connect(&mut self) -> Result<(), LinkError> {
        let stream = match &self.target {
            TcpTarget::Socket(addr) => TcpStream::connect(*addr).await,
            TcpTarget::Host(host) => TcpStream::connect(host.as_str()).await,
        }
        .map_err(LinkError::from_connect_io)?;
        stream.set_nodelay(true).ok();
        self.stream = Some(stream);
        Ok(())
    }

    async fn write(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| LinkError::WriteFailed("not connected".into()))?;
        stream
            .write_all(payload)
            .await
            .map_err(LinkError::from_write_io)?;
        stream.flush().await.map_err(LinkError::from_write_io)?;
        stream.shutdown().await.map_err(LinkError::from_write_io)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        if let Some(mut stream) = self.stream.take() {
            // Already half-closed after a successful write
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.stream.take();
    }
}

/// Connect to the peer's own socket address
struct DirectAddress;

#[async_trait]
impl ConnectionStrategy for DirectAddress {
    fn name(&self) -> &str {
        "direct-address"
    }

    async fn open(&self, peer: &PeerRecord) -> Result<Option<Box<dyn ChannelHandle>>, LinkError> {
        Ok(match &peer.address {
            PeerAddress::Socket(addr) => Some(Box::new(TcpHandle::socket(*addr))),
            _ => None,
        })
    }
}

/// Resolve `host:port` at connect time
struct ResolveHost;

#[async_trait]
impl ConnectionStrategy for ResolveHost {
    fn name(&self) -> &str {
        "resolve-host"
    }

    async fn open(&self, peer: &PeerRecord) -> Result<Option<Box<dyn ChannelHandle>>, LinkError> {
        Ok(match &peer.address {
            PeerAddress::Host(host) => Some(Box::new(TcpHandle::host(host.clone()))),
            _ => None,
        })
    }
}

/// Fall back to the group owner of the local group
struct GroupOwner(SocketAddr);

#[async_trait]
impl ConnectionStrategy for GroupOwner {
    fn name(&self) -> &str {
        "group-owner"
    }

    async fn open(&self, _peer: &PeerRecord) -> Result<Option<Box<dyn ChannelHandle>>, LinkError> {
        Ok(Some(Box::new(TcpHandle::socket(self.0))))
    }
}

/// [`PeerLink`] over plain TCP on a local network
pub struct TcpLink {
    config: TcpLinkConfig,
    enabled: AtomicBool,
    strategies: Vec<Arc<dyn ConnectionStrategy>>,
    scan: Mutex<Option<CancellationToken>>,
}

impl TcpLink {
    pub fn new(config: TcpLinkConfig) -> Self {
        let mut strategies: Vec<Arc<dyn ConnectionStrategy>> =
            vec![Arc::new(DirectAddress), Arc::new(ResolveHost)];
        if let Some(owner) = config.group_owner {
            strategies.push(Arc::new(GroupOwner(owner)));
        }
        Self {
            config,
            enabled: AtomicBool::new(true),
            strategies,
            scan: Mutex::new(None),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn replace_scan(&self, token: Option<CancellationToken>) {
        let mut slot = self.scan.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = std::mem::replace(&mut *slot, token) {
            previous.cancel();
        }
    }
}

#[async_trait]
impl PeerLink for TcpLink {
    fn channel(&self) -> ChannelKind {
        self.config.channel
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn bonded_peers(&self) -> Vec<PeerRecord> {
        self.config
            .peers
            .iter()
            .map(|p| PeerRecord::known(p.name.clone(), p.address.clone()))
            .collect()
    }

    async fn start_scan(&self) -> Result<ScanSubscription, LinkError> {
        if !self.is_enabled() {
            return Err(LinkError::Unavailable("link disabled".into()));
        }

        let token = CancellationToken::new();
        self.replace_scan(Some(token.clone()));

        let (tx, subscription) = ScanSubscription::channel(64);
        let candidates = self.config.scan_candidates.clone();
        let probe_timeout = self.config.probe_timeout;
        debug!(candidates = candidates.len(), "Probing scan candidates");

        tokio::spawn(async move {
            let mut probes = JoinSet::new();
            for addr in candidates {
                probes.spawn(async move {
                    let alive = matches!(
                        tokio::time::timeout(probe_timeout, TcpStream::connect(addr)).await,
                        Ok(Ok(_))
                    );
                    (addr, alive)
                });
            }

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        probes.abort_all();
                        return;
                    }
                    next = probes.join_next() => match next {
                        Some(Ok((addr, true))) => {
                            let peer = PeerRecord::discovered(addr.to_string(), PeerAddress::Socket(addr));
                            if tx.send(ScanSignal::PeerFound(peer)).await.is_err() {
                                return;
                            }
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            let _ = tx.send(ScanSignal::Finished).await;
        });

        Ok(subscription)
    }

    fn stop_scan(&self) {
        self.replace_scan(None);
    }

    fn strategies(&self) -> Vec<Arc<dyn ConnectionStrategy>> {
        self.strategies.clone()
    }

    async fn release_prior(&self, peer: &PeerRecord) {
        // Sockets are per-delivery; nothing outlives an attempt
        debug!(peer = %peer.label(), "No prior TCP resources to release");
    }

    async fn release_all(&self) {
        self.stop_scan();
    }
}

/// Accepts inbound alert payloads on a TCP port
pub struct TcpInbound {
    listener: TcpListener,
    read_timeout: Duration,
}

impl TcpInbound {
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            read_timeout: Duration::from_secs(10),
        })
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until cancelled, sending each non-empty payload to `tx`
    pub async fn run(self, tx: mpsc::Sender<Vec<u8>>, cancel: CancellationToken) {
        info!(addr = ?self.listener.local_addr().ok(), "Listening for inbound alerts");
        loop {
            let (stream, remote) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        continue;
                    }
                },
            };

            let tx = tx.clone();
            let read_timeout = self.read_timeout;
            tokio::spawn(async move {
                match tokio::time::timeout(read_timeout, read_payload(stream)).await {
                    Ok(Ok(payload)) if !payload.is_empty() => {
                        debug!(%remote, bytes = payload.len(), "Received payload");
                        let _ = tx.send(payload).await;
                    }
                    Ok(Ok(_)) => debug!(%remote, "Empty connection"),
                    Ok(Err(e)) => warn!(%remote, error = %e, "Failed to read payload"),
                    Err(_) => warn!(%remote, "Timed out reading payload"),
                }
            });
        }
        info!("Inbound listener stopped");
    }
}

async fn read_payload(stream: TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    stream
        .take(MAX_INBOUND_PAYLOAD as u64)
        .read_to_end(&mut buf)
        .await?;
    Ok(buf)
}
