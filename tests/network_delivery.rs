//! Integration coverage for the interception network's mailbox/delivery
//! path and the orchestrator's port allocation, exercised without a real
//! target binary (none is available in this repo — see spec.md's
//! Non-goals). Mirrors spec.md §8's concrete scenarios 1, 2 and 6.

use modelfuzz_raft::config::FuzzerConfig;
use modelfuzz_raft::message::Message;
use modelfuzz_raft::network::NetworkState;
use modelfuzz_raft::orchestrator::ports_for_slot;
use serde_json::json;

fn msg(from: usize, to: usize, kind: &str) -> Message {
    Message {
        from,
        to,
        kind: kind.to_string(),
        data: json!("payload"),
        id: None,
        params: Some(json!({
            "term": 1,
            "prev_log_term": 0,
            "prev_log_idx": 0,
            "leader_commit": 0,
        })),
    }
}

/// Scenario 1: an empty schedule against a freshly-registered cluster
/// produces no spontaneous Schedule/Crash/Restart/ClientRequest events, and
/// zero replicas never counts as satisfied registration.
#[test]
fn freshly_constructed_network_has_no_replicas_or_events() {
    let network = NetworkState::new();
    assert_eq!(network.num_replicas(), 0);
    assert!(network.event_trace().is_empty());
    assert_eq!(network.leader_id(), -1);
}

/// Scenario 2: delivered messages never exceed sent messages on an edge,
/// and every DeliverMessage is preceded by a SendMessage for that edge.
#[tokio::test]
async fn delivery_drains_at_most_max_msgs_and_preserves_send_before_deliver() {
    let network = NetworkState::new();
    network.register_replica(2, "127.0.0.1:1".to_string());

    for _ in 0..5 {
        network.enqueue_message(msg(1, 2, "append_entries_request"));
    }

    let delivered = network.schedule_node(1, 2, 3, false).await;
    assert_eq!(delivered, 3);
    assert!(network.message_exists(1, 2), "two messages should remain queued");

    let trace = network.event_trace();
    let sends = trace.iter().filter(|e| e.name == "SendMessage").count();
    let delivers = trace.iter().filter(|e| e.name == "DeliverMessage").count();
    assert_eq!(sends, 5);
    assert_eq!(delivers, 3);
    assert!(delivers <= sends);

    let first_send_idx = trace.iter().position(|e| e.name == "SendMessage").unwrap();
    let first_deliver_idx = trace.iter().position(|e| e.name == "DeliverMessage").unwrap();
    assert!(first_send_idx < first_deliver_idx);
}

/// Messages addressed to a crashed node are drained from the mailbox (so
/// the edge empties) but never delivered to an address.
#[tokio::test]
async fn delivery_to_crashed_node_drains_without_http_delivery() {
    let network = NetworkState::new();
    network.enqueue_message(msg(1, 2, "request_vote_request"));

    let delivered = network.schedule_node(1, 2, 5, true).await;
    assert_eq!(delivered, 1);
    assert!(!network.message_exists(1, 2));
    assert_eq!(network.stats().messages_dropped_crashed, 1);
}

/// Draining an absent or already-empty mailbox is a no-op, not an error.
#[tokio::test]
async fn delivery_on_empty_mailbox_returns_zero() {
    let network = NetworkState::new();
    assert_eq!(network.schedule_node(1, 2, 4, false).await, 0);
}

/// Scenario 6: running `workers` concurrent cluster slots over a given
/// `base_network_port` yields disjoint port sets for networks, listeners
/// and nodes, with no overlap even across categories.
#[test]
fn port_allocation_is_disjoint_across_four_workers() {
    let config = FuzzerConfig {
        nodes: 3,
        workers: 4,
        base_network_port: 7071,
        base_listener_port: 9500,
        base_node_port: 10000,
        ..Default::default()
    };

    let mut fuzzer_ports = std::collections::HashSet::new();
    let mut node_and_listener_ports = std::collections::HashSet::new();
    for slot in 0..config.workers {
        let (fuzzer_port, node_ports, listener_ports) = ports_for_slot(&config, slot);
        assert!(fuzzer_ports.insert(fuzzer_port));
        for p in node_ports.into_iter().chain(listener_ports) {
            assert!(node_and_listener_ports.insert(p), "port {p} reused across slots");
        }
    }
    assert_eq!(fuzzer_ports, std::collections::HashSet::from([7071, 7072, 7073, 7074]));
}
