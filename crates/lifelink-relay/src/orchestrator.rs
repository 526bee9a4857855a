//! Relay orchestrator
//!
//! The single entry point of a node session. Inbound envelopes are
//! deduplicated, hop-limited and forwarded uplink or re-broadcast; outbound
//! sessions fan out over the peer fabric; the origin send path tries the
//! dashboard first and falls back to the peer fabric.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use lifelink_core::{
    AlertEnvelope, AuthorizationProbe, ChannelKind, ConnectivityProbe, GrantAll, LocationProvider,
    NoLocation, RelayEvent, RelayEvents, StaticConnectivity,
};
use lifelink_transport::{PeerLink, Uplink};

use crate::RelayConfig;
use crate::broadcaster::{BroadcastOptions, MultiChannelBroadcaster};
use crate::channel_relay::ChannelRelay;
use crate::error::{RelayError, RelayResult};
use crate::ledger::{DedupLedger, LedgerMode};
use crate::report::AggregateReport;
use crate::status::{DeliveryMethod, MessageState, StatusLog};

/// What happened to an inbound envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundDisposition {
    /// Already processed on this device; dropped silently
    Duplicate,
    /// Hop ceiling reached; dropped
    HopLimitReached,
    /// Posted to the dashboard
    ForwardedUplink,
    /// Re-broadcast over the peer fabric
    Rebroadcast { reached: usize },
    /// Neither the dashboard nor any peer could take it
    RebroadcastFailed { reason: String },
}

/// How an originated alert left the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Accepted by the dashboard
    Uplink { message_id: String },
    /// Delivered to at least one peer
    PeerFabric(AggregateReport),
}

impl SendOutcome {
    pub fn message_id(&self) -> &str {
        match self {
            SendOutcome::Uplink { message_id } => message_id,
            SendOutcome::PeerFabric(report) => &report.message_id,
        }
    }

    /// User-facing summary of the send
    pub fn summary(&self) -> String {
        match self {
            SendOutcome::Uplink { .. } => "✅ Emergency alert sent to dashboard".to_string(),
            SendOutcome::PeerFabric(report) => report.summary(),
        }
    }
}

/// Clears the single-flight flag however the send ends
struct SendGuard<'a>(&'a AtomicBool);

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Coordinates dedup, forwarding and broadcast for one node
pub struct RelayOrchestrator {
    config: Arc<RelayConfig>,
    ledger: DedupLedger,
    broadcaster: MultiChannelBroadcaster,
    uplink: Option<Arc<dyn Uplink>>,
    connectivity: Arc<dyn ConnectivityProbe>,
    location: Arc<dyn LocationProvider>,
    events: RelayEvents,
    status: StatusLog,
    sending: AtomicBool,
    session_root: Mutex<CancellationToken>,
}

impl RelayOrchestrator {
    pub fn builder() -> RelayOrchestratorBuilder {
        RelayOrchestratorBuilder::default()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    pub fn status(&self) -> &StatusLog {
        &self.status
    }

    pub fn events(&self) -> &RelayEvents {
        &self.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    pub fn broadcaster(&self) -> &MultiChannelBroadcaster {
        &self.broadcaster
    }

    fn uplink_reachable(&self) -> bool {
        self.uplink.is_some() && self.connectivity.uplink_reachable()
    }

    /// Token for a new session; cancelled by [`cancel_session`](Self::cancel_session)
    fn session_token(&self) -> CancellationToken {
        self.session_root
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .child_token()
    }

    /// Cancel every active session; later sessions start fresh
    pub fn cancel_session(&self) {
        let mut root = self.session_root.lock().unwrap_or_else(|e| e.into_inner());
        info!("Cancelling active relay sessions");
        root.cancel();
        *root = CancellationToken::new();
    }

    /// Parse a raw payload from a peer and process it
    pub async fn handle_inbound_bytes(&self, bytes: &[u8]) -> RelayResult<InboundDisposition> {
        let envelope = AlertEnvelope::from_bytes(bytes).map_err(|e| {
            warn!(error = %e, bytes = bytes.len(), "Dropping malformed payload");
            RelayError::from(e)
        })?;
        Ok(self.handle_inbound(envelope).await)
    }

    /// Process an envelope received from a peer
    #[instrument(
        skip(self, envelope),
        fields(message_id = %envelope.message_id(), relay_count = envelope.relay_count())
    )]
    pub async fn handle_inbound(&self, envelope: AlertEnvelope) -> InboundDisposition {
        let message_id = envelope.message_id().to_string();

        if self.ledger.has_seen(&message_id) {
            debug!("Duplicate envelope dropped");
            return InboundDisposition::Duplicate;
        }

        if envelope.hop_limit_reached(self.config.max_hops) {
            info!(max_hops = self.config.max_hops, "Hop limit reached, dropping");
            return InboundDisposition::HopLimitReached;
        }

        if !self.ledger.mark_seen(&message_id) {
            debug!("Duplicate envelope dropped (concurrent arrival)");
            return InboundDisposition::Duplicate;
        }

        info!(sender = envelope.original_sender(), "Received relayed alert");
        self.events.emit(RelayEvent::message_received(
            message_id.clone(),
            envelope.original_sender(),
            envelope.relay_count(),
        ));
        self.status.record(
            message_id.clone(),
            MessageState::RelayReceived,
            DeliveryMethod::Received,
            format!(
                "From {} (hop {})",
                envelope.original_sender(),
                envelope.relay_count()
            ),
        );

        if self.uplink_reachable()
            && let Some(uplink) = &self.uplink
        {
            match uplink.post(&envelope).await {
                Ok(()) => {
                    info!("Forwarded relayed alert to dashboard");
                    self.events.emit(RelayEvent::relay_forwarded(
                        message_id.clone(),
                        ChannelKind::Uplink,
                        1,
                    ));
                    self.status.update_via(
                        &message_id,
                        MessageState::RelayForwarded,
                        DeliveryMethod::Internet,
                        "Forwarded to dashboard",
                    );
                    return InboundDisposition::ForwardedUplink;
                }
                Err(e) => {
                    warn!(error = %e, "Uplink forward failed, re-broadcasting");
                }
            }
        }

        match self.broadcast_outbound(envelope.as_relay_copy()).await {
            Ok(report) => {
                for result in report.results.iter().filter(|r| r.success) {
                    self.events.emit(RelayEvent::relay_forwarded(
                        message_id.clone(),
                        result.channel,
                        result.delivered,
                    ));
                }
                self.status.update_via(
                    &message_id,
                    MessageState::RelayForwarded,
                    DeliveryMethod::Relay,
                    format!("Re-broadcast to {} device(s)", report.total_reached),
                );
                InboundDisposition::Rebroadcast {
                    reached: report.total_reached,
                }
            }
            Err(e) => {
                warn!(error = %e, "Re-broadcast failed");
                self.status
                    .update(&message_id, MessageState::SentFailed, e.to_string());
                InboundDisposition::RebroadcastFailed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Start an outbound session over the peer fabric
    ///
    /// The envelope's own id is marked seen after any ledger reset so that
    /// echoes of it are dropped.
    #[instrument(skip(self, envelope), fields(message_id = %envelope.message_id()))]
    pub async fn broadcast_outbound(&self, envelope: AlertEnvelope) -> RelayResult<AggregateReport> {
        let cancel = self.session_token();

        match self.config.ledger_mode {
            LedgerMode::SessionReset => self.ledger.reset(),
            LedgerMode::Expiring => {
                self.ledger.cleanup_expired();
            }
        }
        self.ledger.mark_seen(envelope.message_id());

        let result = self
            .broadcaster
            .broadcast(&envelope, BroadcastOptions::peer_fabric(), &cancel)
            .await;

        if cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }
        result
    }

    /// Send an alert originated on this device
    ///
    /// Only one send may run at a time. Missing coordinates are filled from
    /// the location provider; the dashboard is tried first when reachable.
    #[instrument(skip(self, envelope), fields(message_id = %envelope.message_id()))]
    pub async fn send_alert(&self, envelope: AlertEnvelope) -> RelayResult<SendOutcome> {
        if self
            .sending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Send already in progress");
            return Err(RelayError::SendInProgress);
        }
        let _guard = SendGuard(&self.sending);

        let envelope = if envelope.has_location() {
            envelope
        } else {
            match self.location.last_known_location().await {
                Some(coords) => envelope.with_location(coords),
                None => {
                    warn!("No location available, sending without coordinates");
                    envelope
                }
            }
        };
        let message_id = envelope.message_id().to_string();

        if self.uplink_reachable()
            && let Some(uplink) = &self.uplink
        {
            self.status.record(
                message_id.clone(),
                MessageState::Sending,
                DeliveryMethod::Internet,
                "Sending to dashboard",
            );
            match uplink.post(&envelope).await {
                Ok(()) => {
                    self.ledger.mark_seen(&message_id);
                    self.status
                        .update(&message_id, MessageState::SentSuccess, "Delivered to dashboard");
                    info!("Alert delivered to dashboard");
                    return Ok(SendOutcome::Uplink { message_id });
                }
                Err(e) => {
                    warn!(error = %e, "Dashboard send failed, falling back to peer fabric");
                    self.status.update(
                        &message_id,
                        MessageState::Sending,
                        format!("{e}; retrying over nearby devices"),
                    );
                }
            }
        } else {
            info!("No internet, sending over nearby devices");
            self.status.record(
                message_id.clone(),
                MessageState::Sending,
                DeliveryMethod::PeerFabric,
                "Sending over nearby devices",
            );
        }

        match self.broadcast_outbound(envelope).await {
            Ok(report) => {
                let method = if report.results.len() > 1 {
                    DeliveryMethod::MultiChannel
                } else {
                    DeliveryMethod::PeerFabric
                };
                self.status.update_via(
                    &message_id,
                    MessageState::SentSuccess,
                    method,
                    report.summary(),
                );
                Ok(SendOutcome::PeerFabric(report))
            }
            Err(e) => {
                self.status
                    .update(&message_id, MessageState::SentFailed, e.to_string());
                self.events.emit(RelayEvent::error(e.to_string()));
                Err(e)
            }
        }
    }
}

/// Builder for [`RelayOrchestrator`]
pub struct RelayOrchestratorBuilder {
    config: RelayConfig,
    connectivity: Arc<dyn ConnectivityProbe>,
    location: Arc<dyn LocationProvider>,
    authorization: Arc<dyn AuthorizationProbe>,
    uplink: Option<Arc<dyn Uplink>>,
    links: Vec<Arc<dyn PeerLink>>,
    events: Option<RelayEvents>,
}

impl Default for RelayOrchestratorBuilder {
    fn default() -> Self {
        Self {
            config: RelayConfig::default(),
            connectivity: Arc::new(StaticConnectivity::offline()),
            location: Arc::new(NoLocation),
            authorization: Arc::new(GrantAll),
            uplink: None,
            links: Vec::new(),
            events: None,
        }
    }
}

impl RelayOrchestratorBuilder {
    pub fn with_config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_connectivity(mut self, connectivity: Arc<dyn ConnectivityProbe>) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn with_location(mut self, location: Arc<dyn LocationProvider>) -> Self {
        self.location = location;
        self
    }

    pub fn with_authorization(mut self, authorization: Arc<dyn AuthorizationProbe>) -> Self {
        self.authorization = authorization;
        self
    }

    pub fn with_uplink(mut self, uplink: Arc<dyn Uplink>) -> Self {
        self.uplink = Some(uplink);
        self
    }

    /// Add a peer-fabric link; one link per channel kind
    pub fn with_link(mut self, link: Arc<dyn PeerLink>) -> Self {
        self.links.push(link);
        self
    }

    /// Publish on an existing event channel
    pub fn with_events(mut self, events: RelayEvents) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> RelayOrchestrator {
        for warning in self.config.validate() {
            warn!(%warning, "Relay configuration warning");
        }

        let config = Arc::new(self.config);
        let events = self
            .events
            .unwrap_or_else(|| RelayEvents::new(config.event_capacity));

        let mut channels: Vec<Arc<ChannelRelay>> = Vec::with_capacity(self.links.len());
        for link in self.links {
            let kind = link.channel();
            if channels.iter().any(|c| c.channel() == kind) {
                warn!(channel = %kind, "Ignoring second link for channel");
                continue;
            }
            channels.push(Arc::new(ChannelRelay::new(
                link,
                self.authorization.clone(),
                config.delivery.clone(),
                config.channel(kind),
                events.clone(),
            )));
        }

        let broadcaster = MultiChannelBroadcaster::new(
            channels,
            self.uplink.clone(),
            self.connectivity.clone(),
            config.clone(),
            events.clone(),
        );

        RelayOrchestrator {
            ledger: DedupLedger::for_mode(config.ledger_mode, config.seen_timeout()),
            status: StatusLog::new(config.status_history),
            broadcaster,
            uplink: self.uplink,
            connectivity: self.connectivity,
            location: self.location,
            events,
            sending: AtomicBool::new(false),
            session_root: Mutex::new(CancellationToken::new()),
            config,
        }
    }
}
