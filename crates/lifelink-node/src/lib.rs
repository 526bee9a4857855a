//! # LifeLink Node
//!
//! A relay node that runs the LifeLink relay over TCP.
//!
//! [`LifelinkNode`] ties together:
//! - The TCP peer link (known peers, probe-based discovery, group owner fallback)
//! - The inbound listener feeding received alerts into the relay
//! - The dashboard uplink, when configured
//!
//! ## Example
//!
//! ```rust,ignore
//! use lifelink_node::{LifelinkNode, NodeConfig};
//!
//! let node = LifelinkNode::new(NodeConfig::load("node.toml")?)?;
//! let addr = node.start().await?;
//!
//! let alert = node.alert_builder().message("Injured, need help").build_checked()?;
//! let outcome = node.send_alert(alert).await?;
//! println!("{}", outcome.summary());
//!
//! node.stop().await;
//! ```

mod config;
mod error;

pub use config::{DEFAULT_PORT, LinkSection, NodeConfig, PeerEntry};
pub use error::{NodeError, NodeResult};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use lifelink_core::{
    AlertEnvelope, ConnectivityProbe, EnvelopeBuilder, FixedLocation, LocationProvider,
    NoLocation, RelayEvent, StaticConnectivity, TransportKind,
};
use lifelink_relay::{InboundDisposition, RelayOrchestrator, SendOutcome};
use lifelink_transport::{HttpUplink, TcpInbound, TcpLink, Uplink};

/// Buffered inbound payloads awaiting the relay
const INBOUND_QUEUE: usize = 64;

/// A running relay node
pub struct LifelinkNode {
    config: NodeConfig,
    relay: Arc<RelayOrchestrator>,
    link: Arc<TcpLink>,
    shutdown: Mutex<CancellationToken>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    started: AtomicBool,
}

impl LifelinkNode {
    /// Wire up the relay from configuration
    ///
    /// Nothing is bound until [`start`](Self::start).
    pub fn new(config: NodeConfig) -> NodeResult<Self> {
        config.validate()?;

        let link = Arc::new(TcpLink::new(config.tcp_link()));

        let connectivity: Arc<dyn ConnectivityProbe> = if config.assume_online {
            Arc::new(StaticConnectivity::online(TransportKind::Wifi))
        } else {
            Arc::new(StaticConnectivity::offline())
        };
        let location: Arc<dyn LocationProvider> = match config.location {
            Some(coords) => Arc::new(FixedLocation(coords)),
            None => Arc::new(NoLocation),
        };

        let mut builder = RelayOrchestrator::builder()
            .with_config(config.relay.clone())
            .with_connectivity(connectivity)
            .with_location(location)
            .with_link(link.clone());

        if let Some(url) = &config.dashboard_url {
            let uplink: Arc<dyn Uplink> =
                Arc::new(HttpUplink::new(url.clone(), config.relay.uplink_timeout())?);
            builder = builder.with_uplink(uplink);
        }

        info!(
            name = %config.name,
            channel = %config.link.channel,
            peers = config.link.peers.len(),
            uplink = config.dashboard_url.is_some(),
            "Node created"
        );

        Ok(Self {
            relay: Arc::new(builder.build()),
            link,
            config,
            shutdown: Mutex::new(CancellationToken::new()),
            tasks: Mutex::new(Vec::new()),
            local_addr: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn relay(&self) -> &Arc<RelayOrchestrator> {
        &self.relay
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.relay.subscribe()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Address the inbound listener is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Turn the TCP link on or off
    pub fn set_link_enabled(&self, enabled: bool) {
        self.link.set_enabled(enabled);
    }

    /// Bind the inbound listener and start relaying received alerts
    #[instrument(skip(self), fields(node = %self.config.name))]
    pub async fn start(&self) -> NodeResult<SocketAddr> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyStarted);
        }

        let inbound = match TcpInbound::bind(self.config.listen_addr).await {
            Ok(inbound) => inbound,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        let addr = inbound.local_addr()?;
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = Some(addr);

        let shutdown = {
            let mut token = self.shutdown.lock().unwrap_or_else(|e| e.into_inner());
            if token.is_cancelled() {
                *token = CancellationToken::new();
            }
            token.clone()
        };

        let (payload_tx, payload_rx) = mpsc::channel(INBOUND_QUEUE);
        let listener_task = tokio::spawn(inbound.run(payload_tx, shutdown.clone()));
        let handler_task = tokio::spawn(handle_payloads(
            self.relay.clone(),
            payload_rx,
            shutdown,
        ));

        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend([listener_task, handler_task]);

        info!(%addr, "Node started");
        Ok(addr)
    }

    /// Stop listening and cancel any relay session in flight
    #[instrument(skip(self), fields(node = %self.config.name))]
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        self.shutdown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();
        self.relay.cancel_session();

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = None;
        info!("Node stopped");
    }

    /// Builder pre-filled with this node's sender details
    pub fn alert_builder(&self) -> EnvelopeBuilder {
        let builder = AlertEnvelope::builder(self.config.name.clone());
        match &self.config.phone {
            Some(phone) => builder.phone(phone.clone()),
            None => builder,
        }
    }

    /// Send an alert originated on this node
    pub async fn send_alert(&self, envelope: AlertEnvelope) -> NodeResult<SendOutcome> {
        Ok(self.relay.send_alert(envelope).await?)
    }
}

/// Feed received payloads to the relay one at a time until shutdown
async fn handle_payloads(
    relay: Arc<RelayOrchestrator>,
    mut payloads: mpsc::Receiver<Vec<u8>>,
    shutdown: CancellationToken,
) {
    loop {
        let payload = tokio::select! {
            _ = shutdown.cancelled() => break,
            payload = payloads.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };

        match relay.handle_inbound_bytes(&payload).await {
            Ok(InboundDisposition::Duplicate) => debug!("Dropped duplicate alert"),
            Ok(disposition) => info!(?disposition, "Inbound alert handled"),
            Err(e) => warn!(error = %e, "Rejected inbound payload"),
        }
    }
    debug!("Inbound handler stopped");
}
