//! Multi-channel broadcaster
//!
//! Fans one envelope out over every usable channel at once, each under its
//! own time window, and waits for all of them before reporting.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use lifelink_core::{AlertEnvelope, ChannelKind, ConnectivityProbe, RelayEvent, RelayEvents};
use lifelink_transport::Uplink;

use crate::RelayConfig;
use crate::channel_relay::ChannelRelay;
use crate::error::{RelayError, RelayResult};
use crate::report::{AggregateReport, ChannelResult};

/// Time a channel gets after its window to cancel and release its handles
const WIND_DOWN_GRACE: Duration = Duration::from_secs(2);

/// What one channel task hands back to the broadcaster
struct ChannelRun {
    result: ChannelResult,
    /// Set when the channel could not start at all
    precondition: Option<RelayError>,
}

impl ChannelRun {
    fn finished(result: ChannelResult) -> Self {
        Self {
            result,
            precondition: None,
        }
    }
}

/// Per-broadcast switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastOptions {
    /// Let the HTTP uplink participate as a channel
    pub include_uplink: bool,
}

impl BroadcastOptions {
    /// Every channel including the uplink
    pub fn all_channels() -> Self {
        Self {
            include_uplink: true,
        }
    }

    /// Only the peer fabric
    pub fn peer_fabric() -> Self {
        Self {
            include_uplink: false,
        }
    }
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self::all_channels()
    }
}

/// Parallel fan-out over all channels
pub struct MultiChannelBroadcaster {
    channels: Vec<Arc<ChannelRelay>>,
    uplink: Option<Arc<dyn Uplink>>,
    connectivity: Arc<dyn ConnectivityProbe>,
    config: Arc<RelayConfig>,
    events: RelayEvents,
}

impl MultiChannelBroadcaster {
    pub fn new(
        channels: Vec<Arc<ChannelRelay>>,
        uplink: Option<Arc<dyn Uplink>>,
        connectivity: Arc<dyn ConnectivityProbe>,
        config: Arc<RelayConfig>,
        events: RelayEvents,
    ) -> Self {
        Self {
            channels,
            uplink,
            connectivity,
            config,
            events,
        }
    }

    pub fn channels(&self) -> &[Arc<ChannelRelay>] {
        &self.channels
    }

    /// Channels that would take part in a broadcast right now
    pub fn usable_channels(&self, options: BroadcastOptions) -> Vec<ChannelKind> {
        let mut usable: Vec<ChannelKind> = self
            .channels
            .iter()
            .filter(|c| c.is_enabled())
            .map(|c| c.channel())
            .collect();
        if options.include_uplink && self.uplink.is_some() && self.connectivity.uplink_reachable() {
            usable.insert(0, ChannelKind::Uplink);
        }
        usable
    }

    /// Broadcast over every usable channel and aggregate the results
    #[instrument(skip(self, envelope, cancel), fields(message_id = %envelope.message_id()))]
    pub async fn broadcast(
        &self,
        envelope: &AlertEnvelope,
        options: BroadcastOptions,
        cancel: &CancellationToken,
    ) -> RelayResult<AggregateReport> {
        let usable = self.usable_channels(options);
        if usable.is_empty() {
            // Configured but switched off channels explain themselves
            let err = self
                .channels
                .iter()
                .find_map(|c| c.check_preconditions().err())
                .unwrap_or(RelayError::NoChannels);
            warn!(error = %err, "No usable channels");
            self.events.emit(RelayEvent::error(err.to_string()));
            return Err(err);
        }

        info!(channels = ?usable, "Starting multi-channel transmission");
        self.events.emit(RelayEvent::transmission_started(
            envelope.message_id(),
            usable.clone(),
        ));

        let envelope = Arc::new(envelope.clone());
        let mut tasks: JoinSet<ChannelRun> = JoinSet::new();

        for kind in &usable {
            let token = cancel.child_token();
            let envelope = envelope.clone();
            match kind {
                ChannelKind::Uplink => {
                    let Some(uplink) = self.uplink.clone() else {
                        continue;
                    };
                    let window = self.config.uplink_window();
                    tasks.spawn(async move {
                        ChannelRun::finished(uplink_task(uplink, envelope, window, token).await)
                    });
                }
                peer_kind => {
                    let Some(relay) = self
                        .channels
                        .iter()
                        .find(|c| c.channel() == *peer_kind)
                        .cloned()
                    else {
                        continue;
                    };
                    tasks.spawn(async move { channel_task(relay, envelope, token).await });
                }
            }
        }

        let mut results = Vec::with_capacity(usable.len());
        let mut preconditions = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(ChannelRun {
                    result,
                    precondition,
                }) => {
                    preconditions.extend(precondition);
                    self.events.emit(RelayEvent::channel_progress(
                        result.channel,
                        result.success,
                        result.delivered,
                        result.message.clone(),
                    ));
                    results.push(result);
                }
                Err(e) => warn!(error = %e, "Channel task failed"),
            }
        }

        let report = AggregateReport::new(envelope.message_id(), results);
        info!(
            total_reached = report.total_reached,
            channels_succeeded = report.channels_succeeded(),
            "Multi-channel transmission complete"
        );
        self.events.emit(RelayEvent::transmission_complete(
            report.message_id.clone(),
            report.total_reached,
            report.channels_succeeded(),
        ));

        if report.is_success() {
            return Ok(report);
        }
        // Nothing ran because no channel could start
        if !preconditions.is_empty() && preconditions.len() == report.results.len() {
            return Err(preconditions.swap_remove(0));
        }
        Err(RelayError::NothingDelivered(report))
    }
}

/// Run one peer channel; its own window cancels it, the grace is a backstop
async fn channel_task(
    relay: Arc<ChannelRelay>,
    envelope: Arc<AlertEnvelope>,
    token: CancellationToken,
) -> ChannelRun {
    let channel = relay.channel();
    let limit = relay.config().window() + WIND_DOWN_GRACE;
    match tokio::time::timeout(limit, relay.broadcast_outbound(&envelope, &token)).await {
        Ok(Ok(result)) => ChannelRun::finished(result),
        Ok(Err(e @ RelayError::Precondition { .. })) => ChannelRun {
            result: ChannelResult::failed(channel, e.to_string()),
            precondition: Some(e),
        },
        Ok(Err(e)) => ChannelRun::finished(ChannelResult::failed(channel, e.to_string())),
        Err(_) => {
            token.cancel();
            warn!(%channel, limit_ms = limit.as_millis() as u64, "Channel did not wind down");
            ChannelRun::finished(ChannelResult::failed(
                channel,
                format!("{} timed out", channel.name()),
            ))
        }
    }
}

async fn uplink_task(
    uplink: Arc<dyn Uplink>,
    envelope: Arc<AlertEnvelope>,
    window: Duration,
    token: CancellationToken,
) -> ChannelResult {
    tokio::select! {
        _ = token.cancelled() => ChannelResult::failed(ChannelKind::Uplink, RelayError::Cancelled.to_string()),
        res = tokio::time::timeout(window, uplink.post(&envelope)) => match res {
            Ok(Ok(())) => ChannelResult::uplink_delivered(),
            Ok(Err(e)) => {
                warn!(error = %e, endpoint = uplink.endpoint(), "Uplink failed");
                ChannelResult::failed(ChannelKind::Uplink, e.to_string())
            }
            Err(_) => ChannelResult::failed(
                ChannelKind::Uplink,
                format!("{} timed out", ChannelKind::Uplink.name()),
            ),
        },
    }
}
