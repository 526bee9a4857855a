//! Per-peer delivery attempts
//!
//! One [`DeliveryAttempt::deliver`] call drives a single peer through
//! `DisconnectingPrior → Connecting → Connected → Writing → Closed`, retrying
//! the whole sequence with linear backoff. The channel handle lives inside a
//! [`HandleGuard`] so it is released exactly once on every path, including
//! when the delivering task is cancelled or dropped.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::directory::PeerDirectory;
use crate::error::LinkError;
use crate::link::{ChannelHandle, MAX_STRATEGIES, PeerLink};
use crate::peer::PeerRecord;

/// Retry and timeout settings for delivery attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Whole-peer attempts before giving up
    pub max_attempts: u32,
    /// Backoff after attempt `n` is `n * backoff_step_ms`
    pub backoff_step_ms: u64,
    /// Hard limit on one connect
    pub connect_timeout_ms: u64,
    /// Write attempts per connection
    pub write_attempts: u32,
    /// Pause between failed writes
    pub write_retry_pause_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_step_ms: 300,
            connect_timeout_ms: 5_000,
            write_attempts: 3,
            write_retry_pause_ms: 200,
        }
    }
}

impl DeliveryConfig {
    /// Millisecond timings for tests
    pub fn testing() -> Self {
        Self {
            max_attempts: 5,
            backoff_step_ms: 2,
            connect_timeout_ms: 100,
            write_attempts: 3,
            write_retry_pause_ms: 1,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_step_ms.saturating_mul(attempt as u64))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_retry_pause(&self) -> Duration {
        Duration::from_millis(self.write_retry_pause_ms)
    }

    /// Time spent on a peer whose connect never completes
    ///
    /// Every attempt runs into the connect timeout and every gap between
    /// attempts sleeps the linear backoff.
    pub fn unreachable_peer_budget(&self) -> Duration {
        let attempts = self.max_attempts.max(1) as u64;
        let connects = attempts.saturating_mul(self.connect_timeout_ms);
        let backoff_steps = attempts * (attempts - 1) / 2;
        let backoffs = backoff_steps.saturating_mul(self.backoff_step_ms);
        Duration::from_millis(connects.saturating_add(backoffs))
    }
}

/// Where a delivery attempt currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryState {
    DisconnectingPrior,
    Connecting,
    Connected,
    Writing,
    Closed,
}

/// Result of delivering to one peer
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub peer: PeerRecord,
    pub delivered: bool,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// `Closed` after a successful write, otherwise where the last attempt stopped
    pub final_state: DeliveryState,
    /// Aborted on an authorization failure
    pub permission_denied: bool,
}

/// Owns a channel handle and releases it exactly once
///
/// [`close`](Self::close) releases gracefully; dropping an unreleased guard
/// falls back to the handle's synchronous `abort`.
pub struct HandleGuard {
    handle: Option<Box<dyn ChannelHandle>>,
}

impl HandleGuard {
    pub fn new(handle: Box<dyn ChannelHandle>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    fn handle_mut(&mut self) -> Result<&mut Box<dyn ChannelHandle>, LinkError> {
        self.handle.as_mut().ok_or(LinkError::NoHandle)
    }

    /// Close the handle, aborting it if the close does not finish in time
    pub async fn close(mut self, limit: Duration) {
        if let Some(mut handle) = self.handle.take() {
            match tokio::time::timeout(limit, handle.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "Handle close reported an error"),
                Err(_) => {
                    warn!(limit_ms = limit.as_millis() as u64, "Handle close timed out, aborting");
                    handle.abort();
                }
            }
        }
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Drives delivery of a payload to individual peers of one link
#[derive(Clone)]
pub struct DeliveryAttempt {
    link: Arc<dyn PeerLink>,
    directory: Arc<PeerDirectory>,
    config: DeliveryConfig,
}

impl DeliveryAttempt {
    pub fn new(link: Arc<dyn PeerLink>, directory: Arc<PeerDirectory>, config: DeliveryConfig) -> Self {
        Self {
            link,
            directory,
            config,
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Deliver `payload` to `peer`, retrying per the configured ceiling
    #[instrument(
        skip(self, payload, cancel),
        fields(peer = %peer.label(), channel = %self.link.channel())
    )]
    pub async fn deliver(
        &self,
        peer: &PeerRecord,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> DeliveryOutcome {
        let mut outcome = DeliveryOutcome {
            peer: peer.clone(),
            delivered: false,
            attempts: 0,
            last_error: None,
            final_state: DeliveryState::DisconnectingPrior,
            permission_denied: false,
        };

        for attempt in 1..=self.config.max_attempts.max(1) {
            if cancel.is_cancelled() {
                outcome.last_error = Some(LinkError::Cancelled.to_string());
                break;
            }

            outcome.attempts = attempt;
            debug!(attempt, "Delivery attempt");

            match self
                .attempt_once(peer, payload, cancel, &mut outcome.final_state)
                .await
            {
                Ok(()) => {
                    outcome.delivered = true;
                    outcome.last_error = None;
                    debug!(attempt, "Delivered");
                    break;
                }
                Err(e) if e.is_permission_denied() => {
                    warn!(attempt, error = %e, "Permission denied, not retrying peer");
                    outcome.permission_denied = true;
                    outcome.last_error = Some(e.to_string());
                    break;
                }
                Err(LinkError::Cancelled) => {
                    outcome.last_error = Some(LinkError::Cancelled.to_string());
                    break;
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Delivery attempt failed");
                    outcome.last_error = Some(e.to_string());
                }
            }

            if attempt < self.config.max_attempts {
                let backoff = self.config.backoff(attempt);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        outcome.last_error = Some(LinkError::Cancelled.to_string());
                        break;
                    }
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }

        if !outcome.delivered && !cancel.is_cancelled() && !outcome.permission_denied {
            warn!(
                attempts = outcome.attempts,
                error = outcome.last_error.as_deref().unwrap_or("unknown"),
                "Giving up on peer"
            );
        }
        outcome
    }

    /// One pass through the state machine; the handle is always released
    async fn attempt_once(
        &self,
        peer: &PeerRecord,
        payload: &[u8],
        cancel: &CancellationToken,
        state: &mut DeliveryState,
    ) -> Result<(), LinkError> {
        enter(state, DeliveryState::DisconnectingPrior);
        self.link.release_prior(peer).await;

        enter(state, DeliveryState::Connecting);
        let mut guard = self.open_handle(peer).await?;
        let result = self
            .connect_and_write(&mut guard, peer, payload, cancel, state)
            .await;

        guard.close(self.config.connect_timeout()).await;
        self.directory.set_connected(&peer.address, false);
        if result.is_ok() {
            enter(state, DeliveryState::Closed);
        }
        result
    }

    async fn open_handle(&self, peer: &PeerRecord) -> Result<HandleGuard, LinkError> {
        let mut last_error = None;
        for strategy in self.link.strategies().into_iter().take(MAX_STRATEGIES) {
            match strategy.open(peer).await {
                Ok(Some(handle)) => {
                    debug!(strategy = strategy.name(), "Strategy produced a handle");
                    return Ok(HandleGuard::new(handle));
                }
                Ok(None) => continue,
                Err(e) if e.is_permission_denied() => return Err(e),
                Err(e) => {
                    debug!(strategy = strategy.name(), error = %e, "Strategy failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(LinkError::NoHandle))
    }

    async fn connect_and_write(
        &self,
        guard: &mut HandleGuard,
        peer: &PeerRecord,
        payload: &[u8],
        cancel: &CancellationToken,
        state: &mut DeliveryState,
    ) -> Result<(), LinkError> {
        let limit = self.config.connect_timeout();
        let handle = guard.handle_mut()?;

        tokio::select! {
            _ = cancel.cancelled() => return Err(LinkError::Cancelled),
            res = tokio::time::timeout(limit, handle.connect()) => match res {
                Ok(r) => r?,
                Err(_) => {
                    return Err(LinkError::ConnectTimeout {
                        timeout_ms: self.config.connect_timeout_ms,
                    })
                }
            },
        }

        enter(state, DeliveryState::Connected);
        self.directory.set_connected(&peer.address, true);

        enter(state, DeliveryState::Writing);
        let mut last_error = None;
        let attempts = self.config.write_attempts.max(1);
        for write in 1..=attempts {
            let res = tokio::select! {
                _ = cancel.cancelled() => return Err(LinkError::Cancelled),
                res = tokio::time::timeout(limit, handle.write(payload)) => res,
            };
            match res {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) if e.is_permission_denied() => return Err(e),
                Ok(Err(e)) => {
                    debug!(write, error = %e, "Write failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    debug!(write, "Write timed out");
                    last_error = Some(LinkError::WriteFailed("timed out".into()));
                }
            }
            if write < attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(LinkError::Cancelled),
                    _ = tokio::time::sleep(self.config.write_retry_pause()) => {}
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LinkError::WriteFailed("no write attempted".into())))
    }
}

fn enter(state: &mut DeliveryState, next: DeliveryState) {
    trace!(state = ?next);
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff() {
        let config = DeliveryConfig::default();
        assert_eq!(config.backoff(1), Duration::from_millis(300));
        assert_eq!(config.backoff(4), Duration::from_millis(1200));
    }

    #[test]
    fn test_default_ceiling() {
        let config = DeliveryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.write_attempts, 3);
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_unreachable_peer_budget() {
        // 5 connect timeouts plus 300 + 600 + 900 + 1200 of backoff
        assert_eq!(
            DeliveryConfig::default().unreachable_peer_budget(),
            Duration::from_millis(28_000)
        );

        let single = DeliveryConfig {
            max_attempts: 1,
            ..DeliveryConfig::default()
        };
        assert_eq!(single.unreachable_peer_budget(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: DeliveryConfig = serde_json::from_str(r#"{"max_attempts": 2}"#).unwrap();
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.backoff_step_ms, 300);
    }
}
