//! Bounded in-memory history of alert outcomes

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of entries kept
pub const DEFAULT_STATUS_HISTORY: usize = 50;

/// Lifecycle state of an alert on this device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    Sending,
    SentSuccess,
    SentFailed,
    RelayReceived,
    RelayForwarded,
}

/// How the alert travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryMethod {
    /// Dashboard uplink
    Internet,
    /// One peer-fabric channel
    PeerFabric,
    /// Received from a peer and passed on over the peer fabric
    Relay,
    /// Received from a peer, not yet passed on
    Received,
    /// Several peer-fabric channels in one broadcast
    MultiChannel,
}

/// One row of the status log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub message_id: String,
    pub time: DateTime<Utc>,
    pub state: MessageState,
    pub method: DeliveryMethod,
    pub details: String,
    pub retry_count: u32,
}

/// Newest-first log capped at a fixed number of entries
#[derive(Debug)]
pub struct StatusLog {
    entries: Mutex<VecDeque<StatusEntry>>,
    capacity: usize,
}

impl Default for StatusLog {
    fn default() -> Self {
        Self::new(DEFAULT_STATUS_HISTORY)
    }
}

impl StatusLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<StatusEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a new entry at the front, evicting the oldest when full
    pub fn record(
        &self,
        message_id: impl Into<String>,
        state: MessageState,
        method: DeliveryMethod,
        details: impl Into<String>,
    ) {
        let mut entries = self.lock();
        entries.push_front(StatusEntry {
            message_id: message_id.into(),
            time: Utc::now(),
            state,
            method,
            details: details.into(),
            retry_count: 0,
        });
        entries.truncate(self.capacity);
    }

    /// Update the newest entry for `message_id`; returns `false` if none exists
    ///
    /// Moving back to [`MessageState::Sending`] counts as a retry.
    pub fn update(&self, message_id: &str, state: MessageState, details: impl Into<String>) -> bool {
        self.modify(message_id, state, None, details.into())
    }

    /// Like [`update`](Self::update), also recording how the alert went out
    pub fn update_via(
        &self,
        message_id: &str,
        state: MessageState,
        method: DeliveryMethod,
        details: impl Into<String>,
    ) -> bool {
        self.modify(message_id, state, Some(method), details.into())
    }

    fn modify(
        &self,
        message_id: &str,
        state: MessageState,
        method: Option<DeliveryMethod>,
        details: String,
    ) -> bool {
        let mut entries = self.lock();
        let Some(entry) = entries.iter_mut().find(|e| e.message_id == message_id) else {
            return false;
        };
        if state == MessageState::Sending && entry.state != MessageState::Sending {
            entry.retry_count += 1;
        }
        entry.state = state;
        if let Some(method) = method {
            entry.method = method;
        }
        entry.details = details;
        entry.time = Utc::now();
        true
    }

    /// Entries, newest first
    pub fn history(&self) -> Vec<StatusEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn latest_state(&self, message_id: &str) -> Option<MessageState> {
        self.lock()
            .iter()
            .find(|e| e.message_id == message_id)
            .map(|e| e.state)
    }

    /// Short count summary, e.g. `"3 sent, 1 relayed"`
    pub fn summary(&self) -> String {
        let entries = self.lock();
        if entries.is_empty() {
            return "No messages".to_string();
        }
        let count = |state: MessageState| entries.iter().filter(|e| e.state == state).count();
        let parts: Vec<String> = [
            (MessageState::Sending, "sending"),
            (MessageState::SentSuccess, "sent"),
            (MessageState::SentFailed, "failed"),
            (MessageState::RelayReceived, "received"),
            (MessageState::RelayForwarded, "relayed"),
        ]
        .into_iter()
        .filter_map(|(state, label)| match count(state) {
            0 => None,
            n => Some(format!("{n} {label}")),
        })
        .collect();
        parts.join(", ")
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_first_and_capped() {
        let log = StatusLog::new(3);
        for i in 0..5 {
            log.record(
                format!("EMG_{i}"),
                MessageState::SentSuccess,
                DeliveryMethod::Internet,
                "ok",
            );
        }
        let ids: Vec<_> = log.history().into_iter().map(|e| e.message_id).collect();
        assert_eq!(ids, ["EMG_4", "EMG_3", "EMG_2"]);
    }

    #[test]
    fn test_update_and_retry_count() {
        let log = StatusLog::default();
        log.record("EMG_1", MessageState::Sending, DeliveryMethod::Internet, "start");
        assert!(log.update("EMG_1", MessageState::SentFailed, "dashboard down"));
        assert!(log.update("EMG_1", MessageState::Sending, "retry over peers"));
        assert!(!log.update("missing", MessageState::SentFailed, ""));

        let entry = &log.history()[0];
        assert_eq!(entry.retry_count, 1);
        assert_eq!(entry.details, "retry over peers");
        assert_eq!(log.latest_state("EMG_1"), Some(MessageState::Sending));
    }

    #[test]
    fn test_update_via_records_method() {
        let log = StatusLog::default();
        log.record("EMG_1", MessageState::RelayReceived, DeliveryMethod::Received, "from Bob");
        assert!(log.update_via(
            "EMG_1",
            MessageState::RelayForwarded,
            DeliveryMethod::Relay,
            "passed on"
        ));
        assert!(log.update("EMG_1", MessageState::RelayForwarded, "still relayed"));

        let entry = &log.history()[0];
        assert_eq!(entry.method, DeliveryMethod::Relay);
        assert_eq!(entry.details, "still relayed");
        assert_eq!(entry.retry_count, 0);
    }

    #[test]
    fn test_summary() {
        let log = StatusLog::default();
        assert_eq!(log.summary(), "No messages");
        for i in 0..3 {
            log.record(format!("s{i}"), MessageState::SentSuccess, DeliveryMethod::PeerFabric, "");
        }
        log.record("r", MessageState::RelayForwarded, DeliveryMethod::Relay, "");
        assert_eq!(log.summary(), "3 sent, 1 relayed");

        log.clear();
        assert!(log.is_empty());
    }
}
