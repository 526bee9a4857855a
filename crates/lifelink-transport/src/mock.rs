//! Scriptable link and uplink for tests and simulations
//!
//! [`MockLink`] decides per peer how each delivery attempt goes and counts
//! every handle it hands out, so tests can assert that handles are released
//! exactly once and see how many were open at the same time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use lifelink_core::{AlertEnvelope, ChannelKind};

use crate::error::{LinkError, UplinkError};
use crate::link::{ChannelHandle, ConnectionStrategy, PeerLink, ScanSignal, ScanSubscription};
use crate::peer::{PeerAddress, PeerRecord};
use crate::uplink::Uplink;

/// How a scripted peer responds to delivery attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Connect fails until attempt `n` (1-based), then the write succeeds
    SucceedOnAttempt(u32),
    /// Every connect fails
    AlwaysFail,
    /// Connect fails with an authorization error
    PermissionDenied,
    /// Connect never completes
    HangOnConnect,
    /// Connect succeeds, every write fails
    WriteFails,
}

/// Snapshot of a [`MockLink`]'s counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockLinkStats {
    pub opened: usize,
    pub closed: usize,
    pub aborted: usize,
    pub double_releases: usize,
    pub max_concurrent: usize,
    pub scans_started: usize,
    pub scans_stopped: usize,
    pub release_prior_calls: usize,
    pub release_all_calls: usize,
}

impl MockLinkStats {
    /// Handles released by either path
    pub fn released(&self) -> usize {
        self.closed + self.aborted
    }
}

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    aborted: AtomicUsize,
    double_releases: AtomicUsize,
    active: AtomicUsize,
    max_concurrent: AtomicUsize,
    scans_started: AtomicUsize,
    scans_stopped: AtomicUsize,
    release_prior_calls: AtomicUsize,
    release_all_calls: AtomicUsize,
}

#[derive(Debug, Default)]
struct MockState {
    counters: Counters,
    behaviors: DashMap<PeerAddress, MockBehavior>,
    attempts: DashMap<PeerAddress, u32>,
    delivered: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MockState {
    fn attempt_for(&self, address: &PeerAddress) -> u32 {
        let mut entry = self.attempts.entry(address.clone()).or_insert(0);
        *entry += 1;
        *entry
    }
}

struct MockHandle {
    state: Arc<MockState>,
    peer: PeerRecord,
    behavior: MockBehavior,
    attempt: u32,
    released: bool,
}

impl MockHandle {
    fn release(&mut self, counter: &AtomicUsize) {
        if self.released {
            self.state
                .counters
                .double_releases
                .fetch_add(1, Ordering::SeqCst);
            return;
        }
        self.released = true;
        counter.fetch_add(1, Ordering::SeqCst);
        self.state.counters.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChannelHandle for MockHandle {
    async fn connect(&mut self) -> Result<(), LinkError> {
        match self.behavior {
            MockBehavior::HangOnConnect => std::future::pending().await,
            MockBehavior::PermissionDenied => Err(LinkError::PermissionDenied(format!(
                "no access to {}",
                self.peer.label()
            ))),
            MockBehavior::AlwaysFail => Err(LinkError::ConnectFailed("scripted failure".into())),
            MockBehavior::SucceedOnAttempt(n) if self.attempt < n => Err(
                LinkError::ConnectFailed(format!("scripted failure on attempt {}", self.attempt)),
            ),
            _ => Ok(()),
        }
    }

    async fn write(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        if self.behavior == MockBehavior::WriteFails {
            return Err(LinkError::WriteFailed("scripted write failure".into()));
        }
        self.state
            .delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((self.peer.label(), payload.to_vec()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        let state = self.state.clone();
        self.release(&state.counters.closed);
        Ok(())
    }

    fn abort(&mut self) {
        let state = self.state.clone();
        self.release(&state.counters.aborted);
    }
}

struct MockStrategy {
    state: Arc<MockState>,
}

#[async_trait]
impl ConnectionStrategy for MockStrategy {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(&self, peer: &PeerRecord) -> Result<Option<Box<dyn ChannelHandle>>, LinkError> {
        let behavior = self
            .state
            .behaviors
            .get(&peer.address)
            .map(|b| *b)
            .unwrap_or(MockBehavior::SucceedOnAttempt(1));
        let attempt = self.state.attempt_for(&peer.address);

        let counters = &self.state.counters;
        counters.opened.fetch_add(1, Ordering::SeqCst);
        let active = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_concurrent.fetch_max(active, Ordering::SeqCst);

        Ok(Some(Box::new(MockHandle {
            state: self.state.clone(),
            peer: peer.clone(),
            behavior,
            attempt,
            released: false,
        })))
    }
}

#[derive(Debug, Clone)]
struct ScriptedFind {
    after: Duration,
    peer: PeerRecord,
}

/// In-memory [`PeerLink`] with scripted peers
pub struct MockLink {
    channel: ChannelKind,
    enabled: AtomicBool,
    bonded: Mutex<Vec<PeerRecord>>,
    scan_script: Mutex<Vec<ScriptedFind>>,
    scan_completes: AtomicBool,
    scan_token: Mutex<Option<CancellationToken>>,
    state: Arc<MockState>,
    strategy: Arc<dyn ConnectionStrategy>,
}

impl MockLink {
    pub fn new(channel: ChannelKind) -> Self {
        let state = Arc::new(MockState::default());
        Self {
            channel,
            enabled: AtomicBool::new(true),
            bonded: Mutex::new(Vec::new()),
            scan_script: Mutex::new(Vec::new()),
            scan_completes: AtomicBool::new(true),
            scan_token: Mutex::new(None),
            strategy: Arc::new(MockStrategy {
                state: state.clone(),
            }),
            state,
        }
    }

    fn address(name: &str) -> PeerAddress {
        PeerAddress::Named(name.to_string())
    }

    /// Add a bonded peer with the given behavior
    pub fn with_bonded(self, name: &str, behavior: MockBehavior) -> Self {
        self.add_bonded(name, behavior);
        self
    }

    pub fn add_bonded(&self, name: &str, behavior: MockBehavior) {
        let address = Self::address(name);
        self.state.behaviors.insert(address.clone(), behavior);
        self.bonded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PeerRecord::known(name, address));
    }

    /// Make a scan report `name` after `after`
    pub fn with_scan_result(self, name: &str, after: Duration, behavior: MockBehavior) -> Self {
        let address = Self::address(name);
        self.state.behaviors.insert(address.clone(), behavior);
        self.scan_script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ScriptedFind {
                after,
                peer: PeerRecord::discovered(name, address),
            });
        self
    }

    /// Keep scans running after the script until stopped
    pub fn with_endless_scan(self) -> Self {
        self.scan_completes.store(false, Ordering::SeqCst);
        self
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn stats(&self) -> MockLinkStats {
        let c = &self.state.counters;
        MockLinkStats {
            opened: c.opened.load(Ordering::SeqCst),
            closed: c.closed.load(Ordering::SeqCst),
            aborted: c.aborted.load(Ordering::SeqCst),
            double_releases: c.double_releases.load(Ordering::SeqCst),
            max_concurrent: c.max_concurrent.load(Ordering::SeqCst),
            scans_started: c.scans_started.load(Ordering::SeqCst),
            scans_stopped: c.scans_stopped.load(Ordering::SeqCst),
            release_prior_calls: c.release_prior_calls.load(Ordering::SeqCst),
            release_all_calls: c.release_all_calls.load(Ordering::SeqCst),
        }
    }

    /// Handles currently open
    pub fn open_handles(&self) -> usize {
        self.state.counters.active.load(Ordering::SeqCst)
    }

    /// Connect attempts made against `name`
    pub fn attempts_for(&self, name: &str) -> u32 {
        self.state
            .attempts
            .get(&Self::address(name))
            .map(|a| *a)
            .unwrap_or(0)
    }

    /// Names of peers that received a payload, in delivery order
    pub fn delivered_to(&self) -> Vec<String> {
        self.state
            .delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Payloads received per peer
    pub fn payloads(&self) -> HashMap<String, Vec<Vec<u8>>> {
        let mut out: HashMap<String, Vec<Vec<u8>>> = HashMap::new();
        for (name, payload) in self
            .state
            .delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
        {
            out.entry(name.clone()).or_default().push(payload.clone());
        }
        out
    }
}

#[async_trait]
impl PeerLink for MockLink {
    fn channel(&self) -> ChannelKind {
        self.channel
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn bonded_peers(&self) -> Vec<PeerRecord> {
        self.bonded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn start_scan(&self) -> Result<ScanSubscription, LinkError> {
        if !self.is_enabled() {
            return Err(LinkError::Unavailable("mock link disabled".into()));
        }
        self.state
            .counters
            .scans_started
            .fetch_add(1, Ordering::SeqCst);

        let token = CancellationToken::new();
        if let Some(previous) = self
            .scan_token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(token.clone())
        {
            previous.cancel();
        }

        let mut script = self
            .scan_script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        script.sort_by_key(|f| f.after);
        let completes = self.scan_completes.load(Ordering::SeqCst);
        let (tx, subscription) = ScanSubscription::channel(16);

        tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            for find in script {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep_until(start + find.after) => {}
                }
                if tx.send(ScanSignal::PeerFound(find.peer)).await.is_err() {
                    return;
                }
            }
            if completes {
                let _ = tx.send(ScanSignal::Finished).await;
            } else {
                token.cancelled().await;
            }
        });

        Ok(subscription)
    }

    fn stop_scan(&self) {
        if let Some(token) = self
            .scan_token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            token.cancel();
        }
        self.state
            .counters
            .scans_stopped
            .fetch_add(1, Ordering::SeqCst);
    }

    fn strategies(&self) -> Vec<Arc<dyn ConnectionStrategy>> {
        vec![self.strategy.clone()]
    }

    async fn release_prior(&self, _peer: &PeerRecord) {
        self.state
            .counters
            .release_prior_calls
            .fetch_add(1, Ordering::SeqCst);
    }

    async fn release_all(&self) {
        self.state
            .counters
            .release_all_calls
            .fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory [`Uplink`] that records what it was given
#[derive(Debug, Default)]
pub struct MockUplink {
    fail: AtomicBool,
    posted: Mutex<Vec<AlertEnvelope>>,
}

impl MockUplink {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let uplink = Self::default();
        uplink.set_failing(true);
        uplink
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Message ids of every post attempt, successful or not
    pub fn posted_ids(&self) -> Vec<String> {
        self.posted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|e| e.message_id().to_string())
            .collect()
    }

    pub fn post_count(&self) -> usize {
        self.posted.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Uplink for MockUplink {
    async fn post(&self, envelope: &AlertEnvelope) -> Result<(), UplinkError> {
        self.posted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(envelope.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(UplinkError::Network("scripted uplink failure".into()));
        }
        Ok(())
    }

    fn endpoint(&self) -> &str {
        "mock://dashboard"
    }
}
