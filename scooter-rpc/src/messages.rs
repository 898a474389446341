//! Request/response payloads for the two peer services.  Modeled directly on `paxos_pb`'s
//! `Phase1A`/`Phase1B`/`Phase2A`/`Phase2B`, generalized to the catch-up RPCs this design adds on
//! top (`Learn`, `DescribeState`, `FetchSnapshot`, `FetchLogRange`), which have no paxos_pb
//! analog and are authored fresh in the same idiom.

use prototk_derive::Message;

use scooter_wire::{LogValue, NodeId, Round, Slot};

///////////////////////////////////////////// Prepare ///////////////////////////////////////////

/// Rallies support for `round` across the half-open slot range `[starting_slot, ending_slot)`.
/// A leader running ahead prepares many slots at once; a cold proposer prepares exactly one.
#[derive(Clone, Debug, Default, Message)]
pub struct PrepareRequest {
    #[prototk(1, message)]
    pub round: Round,
    #[prototk(2, uint64)]
    pub starting_slot: Slot,
    #[prototk(3, uint64)]
    pub ending_slot: Slot,
}

/// Per the promise rule: any slot in range the acceptor already accepted a value for comes back
/// with that value so the proposer is forced to re-propose it instead of its own preferred value.
#[derive(Clone, Debug, Default, Message)]
pub struct PrepareResponse {
    #[prototk(1, message)]
    pub promised: Round,
    #[prototk(2, message)]
    pub accepted: Vec<LogValue>,
    #[prototk(3, Bool)]
    pub ok: bool,
}

////////////////////////////////////////////// Accept ///////////////////////////////////////////

#[derive(Clone, Debug, Default, Message)]
pub struct AcceptRequest {
    #[prototk(1, message)]
    pub value: LogValue,
}

#[derive(Clone, Debug, Default, Message)]
pub struct AcceptResponse {
    #[prototk(1, Bool)]
    pub accepted: bool,
    #[prototk(2, message)]
    pub promised: Round,
}

/////////////////////////////////////////////// Learn ///////////////////////////////////////////

/// Fire-and-forget notification that a slot was chosen.  Correctness never depends on delivery;
/// a node that misses it will learn the same fact via catch-up.
#[derive(Clone, Debug, Default, Message)]
pub struct LearnRequest {
    #[prototk(1, message)]
    pub value: LogValue,
}

#[derive(Clone, Debug, Default, Message)]
pub struct LearnResponse {}

////////////////////////////////////////// DescribeState ////////////////////////////////////////

#[derive(Clone, Debug, Default, Message)]
pub struct DescribeStateRequest {}

#[derive(Clone, Debug, Default, Message)]
pub struct DescribeStateResponse {
    #[prototk(1, uint64)]
    pub first_slot: Slot,
    #[prototk(2, uint64)]
    pub applied_index: Slot,
    #[prototk(3, uint64)]
    pub node_id: NodeId,
    #[prototk(4, uint64)]
    pub leader_hint: NodeId,
}

////////////////////////////////////////// FetchSnapshot /////////////////////////////////////////

#[derive(Clone, Debug, Default, Message)]
pub struct FetchSnapshotRequest {}

#[derive(Clone, Debug, Default, Message)]
pub struct FetchSnapshotResponse {
    #[prototk(1, uint64)]
    pub last_included_slot: Slot,
    #[prototk(2, bytes)]
    pub state: Vec<u8>,
}

////////////////////////////////////////// FetchLogRange /////////////////////////////////////////

#[derive(Clone, Debug, Default, Message)]
pub struct FetchLogRangeRequest {
    #[prototk(1, uint64)]
    pub lo: Slot,
    #[prototk(2, uint64)]
    pub hi: Slot,
}

#[derive(Clone, Debug, Default, Message)]
pub struct FetchLogRangeResponse {
    #[prototk(1, message)]
    pub entries: Vec<LogValue>,
}
