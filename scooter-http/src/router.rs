//! The request router (4.9): dispatches each client HTTP request either to the local node (reads
//! always, writes when this node is the leader) or forwards writes to the current leader. Kept as
//! plain data in/data out (`method`, `path`, `body` -> `status`, `body`) so it never has to know
//! about `tiny_http`'s request/response types -- the server module owns that boundary.

use biometrics::Counter;

use scooter_core::Node;
use scooter_statemachine::ApplyOutcome;
use scooter_wire::{Command, Error};
use zerror::Z;

use crate::directory::HttpDirectory;
use crate::forwarder;
use crate::wire::{ErrorBody, PeerView, PeersResponse, RecordView, ReleaseBody, ReserveBody};

static REQUESTS_HANDLED: Counter = Counter::new("scooter.http.requests");
static REQUESTS_FORWARDED: Counter = Counter::new("scooter.http.forwarded");
static REQUESTS_REJECTED: Counter = Counter::new("scooter.http.rejected");

pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&REQUESTS_HANDLED);
    collector.register_counter(&REQUESTS_FORWARDED);
    collector.register_counter(&REQUESTS_REJECTED);
}

pub fn route(node: &Node, http_directory: &HttpDirectory, method: &str, path: &str, body: &[u8]) -> (u16, Vec<u8>) {
    REQUESTS_HANDLED.click();
    let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    match (method, segments.as_slice()) {
        ("PUT", ["items", id]) => write_op(node, http_directory, method, path, body, Command::Create { id: id.to_string() }),
        ("GET", ["items", id]) => read_one(node, id),
        ("GET", ["items"]) => read_all(node),
        ("POST", ["items", id, "reserve"]) => match serde_json::from_slice::<ReserveBody>(body) {
            Ok(b) => write_op(
                node,
                http_directory,
                method,
                path,
                body,
                Command::Reserve { id: id.to_string(), reservation_id: b.reservation_id },
            ),
            Err(e) => bad_request(e),
        },
        ("POST", ["items", id, "release"]) => match serde_json::from_slice::<ReleaseBody>(body) {
            Ok(b) => write_op(
                node,
                http_directory,
                method,
                path,
                body,
                Command::Release { id: id.to_string(), distance: b.distance },
            ),
            Err(e) => bad_request(e),
        },
        ("POST", ["snapshot"]) => trigger_snapshot(node),
        ("GET", ["peers"]) => list_peers(node),
        _ => (404, json(&ErrorBody { error: "no such route".to_string() })),
    }
}

fn write_op(
    node: &Node,
    http_directory: &HttpDirectory,
    method: &str,
    path: &str,
    body: &[u8],
    command: Command,
) -> (u16, Vec<u8>) {
    if node.is_leader() {
        return match node.submit(command) {
            Ok(outcome) => success_response(outcome),
            Err(err) => error_response(&err),
        };
    }
    let leader = node.leader_hint();
    match http_directory.addr_for(leader) {
        Some(addr) => {
            REQUESTS_FORWARDED.click();
            match forwarder::forward(addr, method, path, body) {
                Ok((status, body)) => (status, body),
                Err(err) => error_response(&err),
            }
        }
        None => error_response(&Error::no_quorum()),
    }
}

fn success_response(outcome: ApplyOutcome) -> (u16, Vec<u8>) {
    let (status, record) = match outcome {
        ApplyOutcome::Created(r) => (201, r),
        ApplyOutcome::Reserved(r) => (200, r),
        ApplyOutcome::Released(r) => (200, r),
    };
    (status, json(&RecordView::from(record)))
}

fn read_one(node: &Node, id: &str) -> (u16, Vec<u8>) {
    match node.get(id) {
        Some(record) => (200, json(&RecordView::from(record))),
        None => (404, json(&ErrorBody { error: format!("scooter {id} not found") })),
    }
}

fn read_all(node: &Node) -> (u16, Vec<u8>) {
    let records: Vec<RecordView> = node.get_all().into_iter().map(RecordView::from).collect();
    (200, json(&records))
}

fn trigger_snapshot(node: &Node) -> (u16, Vec<u8>) {
    match node.force_snapshot() {
        Ok(()) => (204, Vec::new()),
        Err(err) => error_response(&err),
    }
}

fn list_peers(node: &Node) -> (u16, Vec<u8>) {
    let directory = node.directory();
    let peers = directory
        .peers()
        .iter()
        .map(|p| PeerView { node_id: p.node_id, connect: p.connect.clone(), is_self: p.is_self })
        .collect();
    let resp = PeersResponse {
        self_id: directory.self_id(),
        leader_hint: directory.leader_hint(),
        peers,
    };
    (200, json(&resp))
}

/// Maps every `scooter_wire::Error` to the client-facing status in 6 -- `NoQuorum`/`Superseded`
/// to 503 (both are retryable contention failures, not a rejection of the request itself),
/// `StateMachineReject` to 404/409 depending on what was rejected, everything else to 500 with
/// the detail kept server-side, since `long_form()` can carry backtraces and internal state.
fn error_response(err: &Error) -> (u16, Vec<u8>) {
    REQUESTS_REJECTED.click();
    match err {
        Error::NoQuorum { .. } => (503, json(&ErrorBody { error: "no quorum of acceptors reachable".to_string() })),
        Error::Superseded { .. } => {
            (503, json(&ErrorBody { error: "lost the race for every slot tried; retry".to_string() }))
        }
        Error::StateMachineReject { reason, .. } => {
            let status = if reason.contains("not found") { 404 } else { 409 };
            (status, json(&ErrorBody { error: reason.clone() }))
        }
        other => {
            eprintln!("internal error serving HTTP request: {}", other.long_form());
            (500, json(&ErrorBody { error: "internal error".to_string() }))
        }
    }
}

fn bad_request(err: serde_json::Error) -> (u16, Vec<u8>) {
    (400, json(&ErrorBody { error: format!("malformed request body: {err}") }))
}

fn json<T: serde::Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec())
}
