//! Integration tests for lifelink-transport
//!
//! Delivery and discovery run against the scriptable mock link; the TCP
//! link runs over loopback.

use std::sync::Arc;
use std::time::Duration;

use lifelink_core::{AlertEnvelope, ChannelKind, DiscoveryPhase, RelayEvent, RelayEvents};
use lifelink_transport::{
    DeliveryAttempt, DeliveryConfig, DeliveryState, DiscoveryCoordinator, DiscoveryState,
    MockBehavior, MockLink, PeerAddress, PeerDirectory, PeerLink, PeerRecord, TcpInbound, TcpLink,
    TcpLinkConfig, TcpPeer,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Fixture {
    link: Arc<MockLink>,
    directory: Arc<PeerDirectory>,
    coordinator: Arc<DiscoveryCoordinator>,
    events: RelayEvents,
}

async fn fixture(link: MockLink) -> Fixture {
    let link = Arc::new(link);
    let directory = Arc::new(PeerDirectory::new());
    let events = RelayEvents::default();
    let dyn_link: Arc<dyn PeerLink> = link.clone();
    let coordinator = Arc::new(DiscoveryCoordinator::new(
        dyn_link,
        directory.clone(),
        events.clone(),
    ));
    coordinator.refresh_known().await;
    Fixture {
        link,
        directory,
        coordinator,
        events,
    }
}

fn delivery(f: &Fixture, config: DeliveryConfig) -> DeliveryAttempt {
    let dyn_link: Arc<dyn PeerLink> = f.link.clone();
    DeliveryAttempt::new(dyn_link, f.directory.clone(), config)
}

fn known(f: &Fixture, name: &str) -> PeerRecord {
    f.directory
        .known()
        .into_iter()
        .find(|p| p.name == name)
        .expect("peer is bonded")
}

// ============================================================================
// Delivery attempts
// ============================================================================

#[tokio::test]
async fn test_delivery_succeeds_after_retries() {
    let f = fixture(
        MockLink::new(ChannelKind::ShortRangePairing)
            .with_bonded("B", MockBehavior::SucceedOnAttempt(3)),
    )
    .await;
    let d = delivery(&f, DeliveryConfig::testing());

    let outcome = d
        .deliver(&known(&f, "B"), b"{}", &CancellationToken::new())
        .await;

    assert!(outcome.delivered);
    assert_eq!(outcome.attempts, 3);
    assert!(outcome.last_error.is_none());
    assert_eq!(outcome.final_state, DeliveryState::Closed);

    let stats = f.link.stats();
    assert_eq!(stats.opened, 3);
    assert_eq!(stats.released(), 3);
    assert_eq!(stats.double_releases, 0);
    assert_eq!(stats.release_prior_calls, 3);
    assert_eq!(f.link.delivered_to(), vec!["B".to_string()]);
    assert_eq!(f.directory.connected_count(), 0);
}

#[tokio::test]
async fn test_delivery_exhausts_ceiling() {
    let f = fixture(
        MockLink::new(ChannelKind::ShortRangePairing).with_bonded("C", MockBehavior::AlwaysFail),
    )
    .await;
    let d = delivery(&f, DeliveryConfig::testing());

    let outcome = d
        .deliver(&known(&f, "C"), b"{}", &CancellationToken::new())
        .await;

    assert!(!outcome.delivered);
    assert_eq!(outcome.attempts, 5);
    assert!(outcome.last_error.is_some());
    assert_eq!(outcome.final_state, DeliveryState::Connecting);
    assert_eq!(f.link.attempts_for("C"), 5);
    assert_eq!(f.link.stats().released(), 5);
}

#[tokio::test]
async fn test_permission_denied_is_not_retried() {
    let f = fixture(
        MockLink::new(ChannelKind::LocalGroup).with_bonded("P", MockBehavior::PermissionDenied),
    )
    .await;
    let d = delivery(&f, DeliveryConfig::testing());

    let outcome = d
        .deliver(&known(&f, "P"), b"{}", &CancellationToken::new())
        .await;

    assert!(!outcome.delivered);
    assert!(outcome.permission_denied);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(f.link.stats().released(), 1);
}

#[tokio::test]
async fn test_write_failures_use_all_write_attempts() {
    let f = fixture(
        MockLink::new(ChannelKind::LocalGroup).with_bonded("W", MockBehavior::WriteFails),
    )
    .await;
    let config = DeliveryConfig {
        max_attempts: 2,
        ..DeliveryConfig::testing()
    };
    let d = delivery(&f, config);

    let outcome = d
        .deliver(&known(&f, "W"), b"{}", &CancellationToken::new())
        .await;

    assert!(!outcome.delivered);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.final_state, DeliveryState::Writing);
    assert!(outcome.last_error.unwrap().contains("Write failed"));
    assert_eq!(f.link.stats().released(), 2);
}

#[tokio::test]
async fn test_connect_timeout_counts_as_failure() {
    let f = fixture(
        MockLink::new(ChannelKind::LocalGroup).with_bonded("H", MockBehavior::HangOnConnect),
    )
    .await;
    let config = DeliveryConfig {
        max_attempts: 2,
        connect_timeout_ms: 20,
        ..DeliveryConfig::testing()
    };
    let d = delivery(&f, config);

    let outcome = d
        .deliver(&known(&f, "H"), b"{}", &CancellationToken::new())
        .await;

    assert!(!outcome.delivered);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.final_state, DeliveryState::Connecting);
    assert!(outcome.last_error.unwrap().contains("timed out"));
    let stats = f.link.stats();
    assert_eq!(stats.opened, 2);
    assert_eq!(stats.released(), 2);
    assert_eq!(stats.double_releases, 0);
}

#[tokio::test]
async fn test_cancellation_aborts_connect_and_releases_handle() {
    let f = fixture(
        MockLink::new(ChannelKind::LocalGroup).with_bonded("H", MockBehavior::HangOnConnect),
    )
    .await;
    let config = DeliveryConfig {
        connect_timeout_ms: 10_000,
        ..DeliveryConfig::testing()
    };
    let d = delivery(&f, config);
    let peer = known(&f, "H");
    let cancel = CancellationToken::new();

    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { d.deliver(&peer, b"{}", &cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("delivery stops promptly")
        .expect("task completes");

    assert!(!outcome.delivered);
    assert_eq!(outcome.attempts, 1);
    let stats = f.link.stats();
    assert_eq!(stats.opened, 1);
    assert_eq!(stats.closed, 1);
    assert_eq!(f.link.open_handles(), 0);
}

#[tokio::test]
async fn test_dropped_delivery_aborts_handle() {
    let f = fixture(
        MockLink::new(ChannelKind::LocalGroup).with_bonded("H", MockBehavior::HangOnConnect),
    )
    .await;
    let config = DeliveryConfig {
        connect_timeout_ms: 10_000,
        ..DeliveryConfig::testing()
    };
    let d = delivery(&f, config);
    let peer = known(&f, "H");
    let cancel = CancellationToken::new();

    let result =
        tokio::time::timeout(Duration::from_millis(20), d.deliver(&peer, b"{}", &cancel)).await;
    assert!(result.is_err());

    let stats = f.link.stats();
    assert_eq!(stats.opened, 1);
    assert_eq!(stats.aborted, 1);
    assert_eq!(stats.closed, 0);
    assert_eq!(stats.double_releases, 0);
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_discovery_streams_found_peers() {
    let f = fixture(
        MockLink::new(ChannelKind::ShortRangePairing)
            .with_scan_result("D1", Duration::from_millis(5), MockBehavior::SucceedOnAttempt(1))
            .with_scan_result("D2", Duration::from_millis(10), MockBehavior::SucceedOnAttempt(1)),
    )
    .await;
    let mut events = f.events.subscribe();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let found = f
        .coordinator
        .discover(Duration::from_secs(1), &CancellationToken::new(), Some(tx))
        .await;

    assert_eq!(found.len(), 2);
    assert_eq!(f.directory.discovered_len(), 2);
    assert_eq!(rx.recv().await.unwrap().name, "D1");
    assert_eq!(rx.recv().await.unwrap().name, "D2");
    assert_eq!(f.coordinator.state(), DiscoveryState::Idle);

    let mut phases = Vec::new();
    while let Ok(RelayEvent::DiscoveryProgress { phase, .. }) = events.try_recv() {
        phases.push(phase);
    }
    assert_eq!(phases.first(), Some(&DiscoveryPhase::Started));
    assert_eq!(phases.last(), Some(&DiscoveryPhase::Finished { found: 2 }));
}

#[tokio::test]
async fn test_concurrent_discovery_is_skipped() {
    let f = fixture(
        MockLink::new(ChannelKind::ShortRangePairing)
            .with_scan_result("D1", Duration::from_millis(10), MockBehavior::SucceedOnAttempt(1))
            .with_endless_scan(),
    )
    .await;

    let first = {
        let coordinator = f.coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .discover(Duration::from_millis(150), &CancellationToken::new(), None)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(f.coordinator.is_scanning());

    let second = f
        .coordinator
        .discover(Duration::from_secs(5), &CancellationToken::new(), None)
        .await;
    assert!(second.is_empty());

    let first = first.await.unwrap();
    assert_eq!(first.len(), 1);

    let stats = f.link.stats();
    assert_eq!(stats.scans_started, 1);
    assert_eq!(stats.scans_stopped, 1);
    assert_eq!(f.coordinator.state(), DiscoveryState::Idle);
}

#[tokio::test]
async fn test_discovery_timeout_returns_to_idle() {
    let f = fixture(MockLink::new(ChannelKind::LocalGroup).with_endless_scan()).await;

    let found = f
        .coordinator
        .discover(Duration::from_millis(20), &CancellationToken::new(), None)
        .await;

    assert!(found.is_empty());
    assert_eq!(f.link.stats().scans_stopped, 1);
    assert_eq!(f.coordinator.state(), DiscoveryState::Idle);

    // A new scan may start once the previous one is finished
    f.coordinator
        .discover(Duration::from_millis(5), &CancellationToken::new(), None)
        .await;
    assert_eq!(f.link.stats().scans_started, 2);
}

#[tokio::test]
async fn test_discovery_cancellation() {
    let f = fixture(
        MockLink::new(ChannelKind::LocalGroup)
            .with_scan_result("late", Duration::from_secs(5), MockBehavior::SucceedOnAttempt(1)),
    )
    .await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let found = tokio::time::timeout(
        Duration::from_secs(1),
        f.coordinator.discover(Duration::from_secs(10), &cancel, None),
    )
    .await
    .expect("cancelled discovery returns promptly");

    assert!(found.is_empty());
    assert_eq!(f.coordinator.state(), DiscoveryState::Idle);
}

// ============================================================================
// TCP link over loopback
// ============================================================================

#[tokio::test]
async fn test_tcp_delivery_over_loopback() {
    let inbound = TcpInbound::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = inbound.local_addr().unwrap();
    let (tx, mut rx) = mpsc::channel(4);
    let stop = CancellationToken::new();
    tokio::spawn(inbound.run(tx, stop.clone()));

    let link = Arc::new(TcpLink::new(TcpLinkConfig {
        peers: vec![TcpPeer {
            name: "loopback".into(),
            address: PeerAddress::Socket(addr),
        }],
        group_owner: None,
        ..Default::default()
    }));
    let directory = Arc::new(PeerDirectory::new());
    let coordinator =
        DiscoveryCoordinator::new(link.clone(), directory.clone(), RelayEvents::default());
    assert_eq!(coordinator.refresh_known().await, 1);

    let peer = directory.known()[0].clone();
    let envelope = AlertEnvelope::builder("Alice").message_id("EMG_tcp").build();
    let delivery = DeliveryAttempt::new(link, directory, DeliveryConfig::testing());
    let outcome = delivery
        .deliver(&peer, &envelope.to_bytes().unwrap(), &CancellationToken::new())
        .await;
    assert!(outcome.delivered);

    let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let received = AlertEnvelope::from_bytes(&payload).unwrap();
    assert_eq!(received.message_id(), "EMG_tcp");
    assert_eq!(received.name(), "Alice");

    stop.cancel();
}

#[tokio::test]
async fn test_tcp_scan_reports_responders() {
    let inbound = TcpInbound::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let live = inbound.local_addr().unwrap();
    let (tx, _rx) = mpsc::channel(4);
    let stop = CancellationToken::new();
    tokio::spawn(inbound.run(tx, stop.clone()));

    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let link = Arc::new(TcpLink::new(TcpLinkConfig {
        scan_candidates: vec![live, dead],
        probe_timeout: Duration::from_millis(200),
        ..Default::default()
    }));
    let directory = Arc::new(PeerDirectory::new());
    let coordinator = DiscoveryCoordinator::new(link, directory.clone(), RelayEvents::default());

    let found = coordinator
        .discover(Duration::from_secs(2), &CancellationToken::new(), None)
        .await;

    assert_eq!(found.len(), 1);
    assert!(found.contains(&PeerRecord::discovered("", PeerAddress::Socket(live))));
    assert!(directory.contains(&PeerAddress::Socket(live)));

    stop.cancel();
}

#[tokio::test]
async fn test_tcp_connect_refused_is_retried_then_reported() {
    let dead = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let link = Arc::new(TcpLink::new(TcpLinkConfig {
        group_owner: None,
        ..Default::default()
    }));
    let delivery = DeliveryAttempt::new(
        link,
        Arc::new(PeerDirectory::new()),
        DeliveryConfig {
            max_attempts: 2,
            ..DeliveryConfig::testing()
        },
    );

    let peer = PeerRecord::known("gone", PeerAddress::Socket(dead));
    let outcome = delivery
        .deliver(&peer, b"{}", &CancellationToken::new())
        .await;

    assert!(!outcome.delivered);
    assert_eq!(outcome.attempts, 2);
}
