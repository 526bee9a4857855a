//! Per-channel results and the aggregate report

use serde::{Deserialize, Serialize};

use lifelink_core::ChannelKind;
use lifelink_transport::DeliveryOutcome;

/// Failed peer names listed in a status message
pub const MAX_LISTED_FAILURES: usize = 5;

/// Outcome of one channel in one broadcast session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelResult {
    pub channel: ChannelKind,
    pub success: bool,
    /// Peers that received the payload
    pub delivered: usize,
    /// Peers a delivery was attempted to
    pub attempted: usize,
    pub failed_peers: Vec<String>,
    /// Human-readable status line
    pub message: String,
}

impl ChannelResult {
    /// Summarize the per-peer outcomes of a peer-fabric channel
    pub fn from_outcomes(channel: ChannelKind, outcomes: &[DeliveryOutcome]) -> Self {
        let attempted = outcomes.len();
        let delivered = outcomes.iter().filter(|o| o.delivered).count();
        let failed_peers: Vec<String> = outcomes
            .iter()
            .filter(|o| !o.delivered)
            .map(|o| o.peer.label())
            .collect();

        let message = if attempted == 0 {
            "No paired or discoverable devices found.".to_string()
        } else if delivered == 0 {
            format!(
                "❌ Failed to send to any of {attempted} devices. Check that other devices have the app open and {} enabled.",
                channel.name()
            )
        } else if failed_peers.is_empty() {
            format!("✅ Sent to {delivered} of {attempted} devices")
        } else {
            let listed: Vec<&str> = failed_peers
                .iter()
                .take(MAX_LISTED_FAILURES)
                .map(String::as_str)
                .collect();
            format!(
                "✅ Sent to {delivered} of {attempted} devices (failed: {})",
                listed.join(", ")
            )
        };

        Self {
            channel,
            success: delivered > 0,
            delivered,
            attempted,
            failed_peers,
            message,
        }
    }

    /// Summarize a channel whose window expired
    ///
    /// Deliveries that finished in time still count; a channel that reached
    /// nobody reports the timeout instead of the per-peer failure line.
    pub fn timed_out(channel: ChannelKind, outcomes: &[DeliveryOutcome]) -> Self {
        let mut result = Self::from_outcomes(channel, outcomes);
        if !result.success {
            result.message = format!("{} timed out", channel.name());
        }
        result
    }

    /// A channel that reached nobody for a reason other than peer failures
    pub fn failed(channel: ChannelKind, message: impl Into<String>) -> Self {
        Self {
            channel,
            success: false,
            delivered: 0,
            attempted: 0,
            failed_peers: Vec::new(),
            message: message.into(),
        }
    }

    /// The dashboard accepted the alert
    pub fn uplink_delivered() -> Self {
        Self {
            channel: ChannelKind::Uplink,
            success: true,
            delivered: 1,
            attempted: 1,
            failed_peers: Vec::new(),
            message: "✅ Sent to dashboard".to_string(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.channel.name()
    }
}

/// Combined outcome of a multi-channel broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub message_id: String,
    /// Per-channel results in completion order
    pub results: Vec<ChannelResult>,
    /// Sum of delivered counts over all channels
    pub total_reached: usize,
}

impl AggregateReport {
    pub fn new(message_id: impl Into<String>, results: Vec<ChannelResult>) -> Self {
        let total_reached = results.iter().map(|r| r.delivered).sum();
        Self {
            message_id: message_id.into(),
            results,
            total_reached,
        }
    }

    pub fn is_success(&self) -> bool {
        self.total_reached > 0
    }

    pub fn channels_succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn result_for(&self, channel: ChannelKind) -> Option<&ChannelResult> {
        self.results.iter().find(|r| r.channel == channel)
    }

    /// One line per channel, e.g. `"Bluetooth: ✅ Sent to 2 of 3 devices"`
    pub fn summary(&self) -> String {
        self.results
            .iter()
            .map(|r| format!("{}: {}", r.name(), r.message))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifelink_transport::{DeliveryState, PeerAddress, PeerRecord};

    fn outcome(name: &str, delivered: bool) -> DeliveryOutcome {
        DeliveryOutcome {
            peer: PeerRecord::known(name, PeerAddress::Named(name.to_string())),
            delivered,
            attempts: 1,
            last_error: None,
            final_state: DeliveryState::Closed,
            permission_denied: false,
        }
    }

    #[test]
    fn test_partial_success_lists_failures() {
        let outcomes = [outcome("A", true), outcome("B", true), outcome("C", false)];
        let result = ChannelResult::from_outcomes(ChannelKind::ShortRangePairing, &outcomes);
        assert!(result.success);
        assert_eq!(result.delivered, 2);
        assert_eq!(result.attempted, 3);
        assert_eq!(result.message, "✅ Sent to 2 of 3 devices (failed: C)");
    }

    #[test]
    fn test_failure_list_is_capped() {
        let mut outcomes = vec![outcome("ok", true)];
        outcomes.extend((1..=7).map(|i| outcome(&format!("P{i}"), false)));
        let result = ChannelResult::from_outcomes(ChannelKind::LocalGroup, &outcomes);
        assert_eq!(
            result.message,
            "✅ Sent to 1 of 8 devices (failed: P1, P2, P3, P4, P5)"
        );
        assert_eq!(result.failed_peers.len(), 7);
    }

    #[test]
    fn test_all_failed_and_empty_messages() {
        let result = ChannelResult::from_outcomes(
            ChannelKind::ShortRangePairing,
            &[outcome("A", false), outcome("B", false)],
        );
        assert!(!result.success);
        assert!(result.message.starts_with("❌ Failed to send to any of 2 devices."));
        assert!(result.message.ends_with("Bluetooth enabled."));

        let empty = ChannelResult::from_outcomes(ChannelKind::ShortRangePairing, &[]);
        assert!(!empty.success);
        assert_eq!(empty.message, "No paired or discoverable devices found.");
    }

    #[test]
    fn test_aggregate_sums_channels() {
        let report = AggregateReport::new(
            "EMG_1",
            vec![
                ChannelResult::from_outcomes(
                    ChannelKind::ShortRangePairing,
                    &[outcome("A", true), outcome("B", true)],
                ),
                ChannelResult::failed(ChannelKind::SoftAccessPoint, "WiFi-Hotspot timed out"),
                ChannelResult::uplink_delivered(),
            ],
        );
        assert_eq!(report.total_reached, 3);
        assert_eq!(report.channels_succeeded(), 2);
        assert!(report.is_success());
        assert!(report.summary().contains("WiFi-Hotspot: WiFi-Hotspot timed out"));
    }
}
