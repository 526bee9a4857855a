//! Dedup ledger
//!
//! Remembers which message ids this device has already processed so that an
//! alert bouncing around the peer fabric is handled once per device.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// When the ledger is cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerMode {
    /// Entries live for `seen_timeout`; session boundaries do not clear them
    #[default]
    Expiring,
    /// Cleared at the start of every outbound session
    SessionReset,
}

#[derive(Debug, Clone, Copy)]
struct SeenRecord {
    first_seen: Instant,
    count: u32,
}

/// Concurrent set of processed message ids
///
/// Expired entries are treated as absent on lookup, before any cleanup.
#[derive(Debug)]
pub struct DedupLedger {
    seen: DashMap<String, SeenRecord>,
    /// `None` keeps entries until [`reset`](Self::reset)
    seen_timeout: Option<Duration>,
}

impl DedupLedger {
    /// Ledger whose entries expire after `seen_timeout`
    pub fn new(seen_timeout: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            seen_timeout: Some(seen_timeout),
        }
    }

    /// Ledger whose entries live until the next reset
    pub fn session_scoped() -> Self {
        Self {
            seen: DashMap::new(),
            seen_timeout: None,
        }
    }

    /// Ledger for a relay running in `mode`
    pub fn for_mode(mode: LedgerMode, seen_timeout: Duration) -> Self {
        match mode {
            LedgerMode::Expiring => Self::new(seen_timeout),
            LedgerMode::SessionReset => Self::session_scoped(),
        }
    }

    fn is_live(&self, record: &SeenRecord, now: Instant) -> bool {
        match self.seen_timeout {
            Some(timeout) => now.duration_since(record.first_seen) < timeout,
            None => true,
        }
    }

    pub fn has_seen(&self, message_id: &str) -> bool {
        let now = Instant::now();
        self.seen
            .get(message_id)
            .is_some_and(|record| self.is_live(&record, now))
    }

    /// Record an arrival; returns `true` only for the caller that inserted the id
    ///
    /// An expired entry is replaced as if the id had never been seen.
    pub fn mark_seen(&self, message_id: &str) -> bool {
        let now = Instant::now();
        match self.seen.entry(message_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if self.is_live(entry.get(), now) {
                    entry.get_mut().count += 1;
                    false
                } else {
                    entry.insert(SeenRecord {
                        first_seen: now,
                        count: 1,
                    });
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(SeenRecord {
                    first_seen: now,
                    count: 1,
                });
                true
            }
        }
    }

    /// Number of arrivals recorded for an id since it was last first seen
    pub fn seen_count(&self, message_id: &str) -> u32 {
        let now = Instant::now();
        self.seen
            .get(message_id)
            .filter(|record| self.is_live(record, now))
            .map(|record| record.count)
            .unwrap_or(0)
    }

    pub fn reset(&self) {
        debug!(cleared = self.seen.len(), "Dedup ledger reset");
        self.seen.clear();
    }

    /// Drop entries older than the seen timeout
    pub fn cleanup_expired(&self) -> usize {
        if self.seen_timeout.is_none() {
            return 0;
        }
        let now = Instant::now();
        let before = self.seen.len();
        self.seen.retain(|_, record| self.is_live(record, now));
        let removed = before.saturating_sub(self.seen.len());
        if removed > 0 {
            debug!(removed, remaining = self.seen.len(), "Expired dedup entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
