//! A single-node ensemble exercises the full propose -> chosen -> applied pipeline without any
//! network traffic: with zero peers, quorum is one, so `Node::propose` never calls out.

use std::sync::Arc;
use std::time::Duration;

use busyrpc::ClientOptions;

use scooter_core::{Node, NodeOptions};
use scooter_directory::{Directory, PeerAddr};
use scooter_rpc::PeerChannels;
use scooter_wire::Command;

fn single_node() -> Node {
    let addrs = vec![PeerAddr { node_id: 1, connect: "unused:0".to_string() }];
    let directory = Arc::new(Directory::new(1, &addrs));
    let peers = PeerChannels::connect(&directory, ClientOptions::default()).expect("no peers to connect to");
    Node::new(
        directory,
        peers,
        NodeOptions {
            node_id: 1,
            log_compaction_threshold: 1000,
            round_timeout: Duration::from_millis(250),
            recovery_timeout: Duration::from_millis(250),
        },
    )
}

#[test]
fn create_reserve_release_round_trips_through_consensus() {
    let node = single_node();
    node.recover_and_start().expect("recovery with no peers must succeed trivially");

    node.propose(Command::Create { id: "s1".to_string() }).unwrap();
    let record = node.get("s1").expect("record applied after propose returns");
    assert!(record.is_available);

    node.propose(Command::Reserve { id: "s1".to_string(), reservation_id: "r1".to_string() })
        .unwrap();
    assert!(!node.get("s1").unwrap().is_available);

    node.propose(Command::Release { id: "s1".to_string(), distance: 17 }).unwrap();
    let record = node.get("s1").unwrap();
    assert!(record.is_available);
    assert_eq!(record.total_distance, 17);
    assert_eq!(record.current_reservation_id, "");

    node.shutdown();
}

#[test]
fn duplicate_create_surfaces_as_state_machine_rejection() {
    let node = single_node();
    node.recover_and_start().unwrap();
    node.propose(Command::Create { id: "dup".to_string() }).unwrap();
    let err = node.submit(Command::Create { id: "dup".to_string() }).unwrap_err();
    assert!(matches!(err, scooter_wire::Error::StateMachineReject { .. }));
    node.shutdown();
}

#[test]
fn force_snapshot_truncates_log_without_losing_state() {
    let node = single_node();
    node.recover_and_start().unwrap();
    node.propose(Command::Create { id: "s2".to_string() }).unwrap();
    node.force_snapshot().unwrap();
    assert!(node.get("s2").is_some());
    node.shutdown();
}

#[test]
fn single_node_is_always_its_own_leader() {
    let node = single_node();
    assert!(node.is_leader());
    assert_eq!(node.leader_hint(), node.directory().self_id());
}
