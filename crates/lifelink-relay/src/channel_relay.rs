//! Outbound broadcast over a single peer link
//!
//! A session resets stale state, checks that the channel can run, then
//! delivers to known peers and to peers found by a concurrent scan. Each
//! peer is claimed once per session so it never sees two parallel attempts.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use lifelink_core::{AlertEnvelope, AuthorizationProbe, ChannelKind, RelayEvents};
use lifelink_transport::{
    DeliveryAttempt, DeliveryConfig, DeliveryOutcome, DiscoveryCoordinator, PeerDirectory,
    PeerLink, PeerRecord,
};

use crate::ChannelConfig;
use crate::error::{RelayError, RelayResult};
use crate::report::ChannelResult;

/// Relays envelopes over one [`PeerLink`]
pub struct ChannelRelay {
    link: Arc<dyn PeerLink>,
    directory: Arc<PeerDirectory>,
    discovery: Arc<DiscoveryCoordinator>,
    delivery: DeliveryAttempt,
    authorization: Arc<dyn AuthorizationProbe>,
    config: ChannelConfig,
}

impl ChannelRelay {
    pub fn new(
        link: Arc<dyn PeerLink>,
        authorization: Arc<dyn AuthorizationProbe>,
        delivery: DeliveryConfig,
        config: ChannelConfig,
        events: RelayEvents,
    ) -> Self {
        let directory = Arc::new(PeerDirectory::new());
        let discovery = Arc::new(DiscoveryCoordinator::new(
            link.clone(),
            directory.clone(),
            events,
        ));
        let delivery = DeliveryAttempt::new(link.clone(), directory.clone(), delivery);
        Self {
            link,
            directory,
            discovery,
            delivery,
            authorization,
            config,
        }
    }

    pub fn channel(&self) -> ChannelKind {
        self.link.channel()
    }

    pub fn is_enabled(&self) -> bool {
        self.link.is_enabled()
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    pub fn discovery(&self) -> &Arc<DiscoveryCoordinator> {
        &self.discovery
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Fail fast when the channel is switched off or not authorized
    pub fn check_preconditions(&self) -> RelayResult<()> {
        let channel = self.channel();
        if !self.link.is_enabled() {
            return Err(RelayError::Precondition {
                channel,
                remediation: channel.enable_hint().to_string(),
            });
        }
        if !self.authorization.has_required_permissions(channel) {
            return Err(RelayError::Precondition {
                channel,
                remediation: channel.permission_hint().to_string(),
            });
        }
        Ok(())
    }

    /// Deliver `envelope` to every reachable peer of this channel
    ///
    /// Returns the channel's result once every started delivery finished.
    /// When the channel window expires, discovery stops, in-flight deliveries
    /// are cancelled and the result is built from what completed. Zero
    /// targets is reported as [`RelayError::NoPeersReachable`].
    #[instrument(skip(self, envelope, cancel), fields(channel = %self.channel(), message_id = %envelope.message_id()))]
    pub async fn broadcast_outbound(
        &self,
        envelope: &AlertEnvelope,
        cancel: &CancellationToken,
    ) -> RelayResult<ChannelResult> {
        let channel = self.channel();

        self.link.release_all().await;
        self.directory.begin_session();

        self.check_preconditions().map_err(|e| {
            warn!(error = %e, "Channel precondition failed");
            e
        })?;

        let payload: Arc<[u8]> = envelope.to_bytes()?.into();
        self.discovery.refresh_known().await;

        // Cancelled by the caller or by the window, whichever comes first
        let session = cancel.child_token();
        let window = tokio::time::sleep(self.config.window());
        tokio::pin!(window);
        let mut expired = false;

        let mut deliveries = JoinSet::new();
        for peer in self.directory.known() {
            self.spawn_delivery(&mut deliveries, peer, &payload, &session);
        }
        debug!(known = deliveries.len(), "Started deliveries to known peers");

        let (found_tx, mut found_rx) = mpsc::unbounded_channel();
        let scan_cancel = session.child_token();
        let scan = self.discovery.discover(
            self.config.discovery_timeout(),
            &scan_cancel,
            Some(found_tx),
        );
        tokio::pin!(scan);
        let mut scanning = true;

        loop {
            tokio::select! {
                _ = &mut window, if !expired => {
                    expired = true;
                    session.cancel();
                }
                _ = &mut scan, if scanning => scanning = false,
                found = found_rx.recv() => match found {
                    Some(peer) => {
                        if session.is_cancelled() {
                            continue;
                        }
                        self.spawn_delivery(&mut deliveries, peer, &payload, &session);
                    }
                    None => break,
                },
            }
        }

        let mut outcomes: Vec<DeliveryOutcome> = Vec::with_capacity(deliveries.len());
        loop {
            tokio::select! {
                _ = &mut window, if !expired => {
                    expired = true;
                    session.cancel();
                }
                joined = deliveries.join_next() => match joined {
                    Some(Ok(outcome)) => outcomes.push(outcome),
                    Some(Err(e)) => warn!(error = %e, "Delivery task failed"),
                    None => break,
                },
            }
        }

        if cancel.is_cancelled() {
            info!(finished = outcomes.len(), "Channel session cancelled");
            return Err(RelayError::Cancelled);
        }

        if expired {
            let result = ChannelResult::timed_out(channel, &outcomes);
            warn!(
                window_ms = self.config.window_ms,
                delivered = result.delivered,
                attempted = result.attempted,
                "Channel window expired"
            );
            return Ok(result);
        }

        if outcomes.is_empty() {
            info!("No peers to deliver to");
            return Err(RelayError::NoPeersReachable { channel });
        }

        let result = ChannelResult::from_outcomes(channel, &outcomes);
        info!(
            delivered = result.delivered,
            attempted = result.attempted,
            "Channel broadcast finished"
        );
        Ok(result)
    }

    fn spawn_delivery(
        &self,
        deliveries: &mut JoinSet<DeliveryOutcome>,
        peer: PeerRecord,
        payload: &Arc<[u8]>,
        cancel: &CancellationToken,
    ) {
        if !self.directory.claim(&peer.address) {
            debug!(peer = %peer.label(), "Peer already targeted this session");
            return;
        }
        let delivery = self.delivery.clone();
        let payload = payload.clone();
        let token = cancel.child_token();
        deliveries.spawn(async move { delivery.deliver(&peer, &payload, &token).await });
    }
}
