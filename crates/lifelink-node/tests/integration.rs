//! Integration tests for LifelinkNode
//!
//! Nodes run over loopback TCP with millisecond relay timings.

use std::net::SocketAddr;
use std::time::Duration;

use lifelink_core::{ChannelKind, RelayEvent};
use lifelink_node::{LifelinkNode, LinkSection, NodeConfig, NodeError, PeerEntry};
use lifelink_relay::{RelayConfig, SendOutcome};
use tokio::sync::broadcast;

fn node_config(name: &str, peers: &[(&str, SocketAddr)]) -> NodeConfig {
    NodeConfig {
        name: name.to_string(),
        phone: Some("+15550100".to_string()),
        assume_online: false,
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        link: LinkSection {
            peers: peers
                .iter()
                .map(|(name, addr)| PeerEntry {
                    name: name.to_string(),
                    address: addr.to_string(),
                })
                .collect(),
            group_owner: None,
            ..LinkSection::default()
        },
        relay: RelayConfig::testing(),
        ..NodeConfig::default()
    }
}

async fn wait_for_received(
    events: &mut broadcast::Receiver<RelayEvent>,
    id: &str,
) -> Option<u32> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv()).await.ok()?.ok()?;
        if let RelayEvent::MessageReceived {
            message_id,
            relay_count,
            ..
        } = event
            && message_id == id
        {
            return Some(relay_count);
        }
    }
}

#[tokio::test]
async fn test_node_lifecycle() {
    let node = LifelinkNode::new(node_config("alpha", &[])).unwrap();
    assert!(!node.is_started());
    assert!(node.local_addr().is_none());

    let addr = node.start().await.unwrap();
    assert!(node.is_started());
    assert_eq!(node.local_addr(), Some(addr));
    assert!(matches!(node.start().await, Err(NodeError::AlreadyStarted)));

    node.stop().await;
    assert!(!node.is_started());
    assert!(node.local_addr().is_none());

    // Restart after stop
    node.start().await.unwrap();
    node.stop().await;
}

#[tokio::test]
async fn test_alert_reaches_peer_over_tcp() {
    let receiver = LifelinkNode::new(node_config("bravo", &[])).unwrap();
    let receiver_addr = receiver.start().await.unwrap();
    let mut events = receiver.subscribe();

    let sender = LifelinkNode::new(node_config("alpha", &[("bravo", receiver_addr)])).unwrap();
    let alert = sender
        .alert_builder()
        .message("Injured, need help")
        .build_checked()
        .unwrap();
    let id = alert.message_id().to_string();

    let outcome = sender.send_alert(alert).await.unwrap();
    match outcome {
        SendOutcome::PeerFabric(report) => {
            let result = report.result_for(ChannelKind::LocalGroup).unwrap();
            assert_eq!(result.delivered, 1);
            assert_eq!(result.message, "✅ Sent to 1 of 1 devices");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert_eq!(wait_for_received(&mut events, &id).await, Some(0));
    assert!(receiver.relay().ledger().has_seen(&id));

    receiver.stop().await;
}

#[tokio::test]
async fn test_alert_relayed_across_two_hops() {
    let charlie = LifelinkNode::new(node_config("charlie", &[])).unwrap();
    let charlie_addr = charlie.start().await.unwrap();
    let mut charlie_events = charlie.subscribe();

    let bravo = LifelinkNode::new(node_config("bravo", &[("charlie", charlie_addr)])).unwrap();
    let bravo_addr = bravo.start().await.unwrap();

    let alpha = LifelinkNode::new(node_config("alpha", &[("bravo", bravo_addr)])).unwrap();
    let alert = alpha.alert_builder().build_checked().unwrap();
    let id = alert.message_id().to_string();

    alpha.send_alert(alert).await.unwrap();

    assert_eq!(wait_for_received(&mut charlie_events, &id).await, Some(1));
    assert!(charlie.relay().ledger().has_seen(&id));
    assert!(
        charlie
            .relay()
            .status()
            .history()
            .iter()
            .any(|e| e.message_id == id)
    );

    bravo.stop().await;
    charlie.stop().await;
}

#[tokio::test]
async fn test_unreachable_peer_reports_failure() {
    // Bind and drop to get a port nobody listens on
    let dead = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();

    let node = LifelinkNode::new(node_config("alpha", &[("ghost", dead)])).unwrap();
    let alert = node.alert_builder().build_checked().unwrap();

    let err = node.send_alert(alert).await.unwrap_err();
    let relay = match err {
        NodeError::Relay(relay) => relay,
        other => panic!("unexpected error: {other}"),
    };
    let result = relay
        .report()
        .and_then(|r| r.result_for(ChannelKind::LocalGroup))
        .unwrap();
    assert!(result.message.starts_with("❌ Failed to send to any of 1 devices."));
    assert_eq!(result.failed_peers, ["ghost"]);
}

#[tokio::test]
async fn test_disabled_link_reports_enable_hint() {
    let node = LifelinkNode::new(node_config("alpha", &[])).unwrap();
    node.set_link_enabled(false);
    let alert = node.alert_builder().build_checked().unwrap();

    let err = node.send_alert(alert).await.unwrap_err();
    assert!(matches!(
        err,
        NodeError::Relay(lifelink_relay::RelayError::Precondition {
            channel: ChannelKind::LocalGroup,
            ..
        })
    ));
    assert_eq!(err.to_string(), ChannelKind::LocalGroup.enable_hint());
}
