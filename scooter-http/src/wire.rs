//! JSON request/response shapes for the client HTTP surface. Kept separate from
//! `scooter_wire::Command`/`scooter_statemachine::Record` so the wire format the Paxos layer
//! carries (`prototk`, length-delimited) never entangles with the human-inspectable JSON this
//! thin external collaborator speaks.

use serde::{Deserialize, Serialize};

use scooter_statemachine::Record;
use scooter_wire::NodeId;

#[derive(Debug, Default, Deserialize)]
pub struct ReserveBody {
    pub reservation_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReleaseBody {
    pub distance: u64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RecordView {
    pub id: String,
    pub is_available: bool,
    pub current_reservation_id: String,
    pub total_distance: u64,
}

impl From<Record> for RecordView {
    fn from(r: Record) -> Self {
        RecordView {
            id: r.id,
            is_available: r.is_available,
            current_reservation_id: r.current_reservation_id,
            total_distance: r.total_distance,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PeerView {
    pub node_id: NodeId,
    pub connect: String,
    pub is_self: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PeersResponse {
    pub self_id: NodeId,
    pub leader_hint: NodeId,
    pub peers: Vec<PeerView>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
