//! Wire types shared by every component of the scooter-fleet replication core: the slot/round
//! vocabulary, the command payload, and the crate-wide error taxonomy.

use biometrics::Counter;
use prototk_derive::Message;
use zerror::{iotoz, Z};
use zerror_core::ErrorCore;

///////////////////////////////////////////// basics ////////////////////////////////////////////

/// A position in the replicated log.  Slot 0 is the first real entry.
pub type Slot = u64;

/// Small integer identity of a node within the ensemble.  Unlike the teacher's `ReplicaID`
/// (a generated 128-bit id), nodes here are a handful of statically-configured peers, so a plain
/// integer is all the directory needs.
pub type NodeId = u64;

////////////////////////////////////////////// Round ////////////////////////////////////////////

/// A proposer's round for a given slot.  Rounds are ordered lexicographically by
/// `(counter, node)`, which guarantees two proposers never hold the same round for the same slot
/// and that a superseded proposer can always pick a round higher than any it has observed.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Message, Ord, PartialEq, PartialOrd)]
pub struct Round {
    #[prototk(1, uint64)]
    pub counter: u64,
    #[prototk(2, uint64)]
    pub node: NodeId,
}

impl Round {
    /// The smallest possible round; held implicitly by every acceptor before any prepare.
    pub const BOTTOM: Round = Round { counter: 0, node: 0 };

    pub fn first(node: NodeId) -> Round {
        Round { counter: 1, node }
    }

    /// A round guaranteed to supersede `self` and any round this node has issued before.
    pub fn next(&self, node: NodeId) -> Round {
        Round {
            counter: self.counter + 1,
            node,
        }
    }
}

///////////////////////////////////////////// Command ///////////////////////////////////////////

/// The payload carried by a log entry.  The core is agnostic to its semantics beyond determinism
/// of `Apply`; the `Nop` variant lets the proposer fill a slot during leader takeover without
/// touching the state machine.
#[derive(Clone, Debug, Default, Eq, Message, PartialEq)]
pub enum Command {
    #[prototk(1, message)]
    #[default]
    Nop,
    #[prototk(2, message)]
    Create {
        #[prototk(1, string)]
        id: String,
    },
    #[prototk(3, message)]
    Reserve {
        #[prototk(1, string)]
        id: String,
        #[prototk(2, string)]
        reservation_id: String,
    },
    #[prototk(4, message)]
    Release {
        #[prototk(1, string)]
        id: String,
        #[prototk(2, uint64)]
        distance: u64,
    },
}

///////////////////////////////////////////// LogValue //////////////////////////////////////////

/// A proposed value: "the proposer championing `round` proposes putting `command` into `slot`".
/// Named for the teacher's PValue; renamed because this workspace's PValue carries a Paxos
/// `Command` this core does not use.
#[derive(Clone, Debug, Default, Eq, Message, PartialEq)]
pub struct LogValue {
    #[prototk(1, uint64)]
    pub slot: Slot,
    #[prototk(2, message)]
    pub round: Round,
    #[prototk(3, message)]
    pub command: Command,
}

////////////////////////////////////////////// Error ////////////////////////////////////////////

static NOT_LEADER: Counter = Counter::new("scooter.error.not_leader");
static NO_QUORUM: Counter = Counter::new("scooter.error.no_quorum");
static SUPERSEDED: Counter = Counter::new("scooter.error.superseded");
static BELOW_SNAPSHOT: Counter = Counter::new("scooter.error.below_snapshot");
static STATE_MACHINE_REJECT: Counter = Counter::new("scooter.error.state_machine_reject");
static UNKNOWN_COMMAND: Counter = Counter::new("scooter.error.unknown_command");
static RECOVERY_FAILURE: Counter = Counter::new("scooter.error.recovery_failure");
static SERIALIZATION_ERROR: Counter = Counter::new("scooter.error.serialization");
static TRANSPORT_FAILURE: Counter = Counter::new("scooter.error.transport_failure");

/// The crate-wide error taxonomy.  Every public fallible function in the core returns this type
/// (or a thin per-crate wrapper around it).  Each variant embeds an [ErrorCore] so every error
/// carries a backtrace and structured context, and clicks a dedicated counter so error rates are
/// visible in the node's metrics output, matching how `paxos_pb::Error` and `rpc_pb::Error` are
/// built in this workspace.
#[derive(Message, zerror_derive::Z)]
pub enum Error {
    #[prototk(627200, message)]
    NotLeader {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, uint64)]
        leader_hint: Option<NodeId>,
    },
    #[prototk(627201, message)]
    NoQuorum {
        #[prototk(1, message)]
        core: ErrorCore,
    },
    #[prototk(627202, message)]
    Superseded {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, message)]
        observed: Round,
    },
    #[prototk(627203, message)]
    BelowSnapshot {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, uint64)]
        requested: Slot,
        #[prototk(3, uint64)]
        first_slot: Slot,
    },
    #[prototk(627204, message)]
    StateMachineReject {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, string)]
        reason: String,
    },
    #[prototk(627205, message)]
    UnknownCommand {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, string)]
        kind: String,
    },
    #[prototk(627206, message)]
    RecoveryFailure {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, string)]
        detail: String,
    },
    #[prototk(627207, message)]
    SerializationError {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, message)]
        what: prototk::Error,
    },
    #[prototk(627208, message)]
    TransportFailure {
        #[prototk(1, message)]
        core: ErrorCore,
        #[prototk(2, string)]
        what: String,
    },
}

/// Register every error-rate counter this crate declares, so they show up in the node's
/// `/metrics`-equivalent output alongside each component's own counters.
pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&NOT_LEADER);
    collector.register_counter(&NO_QUORUM);
    collector.register_counter(&SUPERSEDED);
    collector.register_counter(&BELOW_SNAPSHOT);
    collector.register_counter(&STATE_MACHINE_REJECT);
    collector.register_counter(&UNKNOWN_COMMAND);
    collector.register_counter(&RECOVERY_FAILURE);
    collector.register_counter(&SERIALIZATION_ERROR);
    collector.register_counter(&TRANSPORT_FAILURE);
}

impl Error {
    pub fn not_leader(leader_hint: Option<NodeId>) -> Self {
        Self::NotLeader {
            core: ErrorCore::new("fleet-oncall@", "write arrived at a non-leader", &NOT_LEADER),
            leader_hint,
        }
    }

    pub fn no_quorum() -> Self {
        Self::NoQuorum {
            core: ErrorCore::new(
                "fleet-oncall@",
                "fewer than a quorum of acceptors responded in time",
                &NO_QUORUM,
            ),
        }
    }

    pub fn superseded(observed: Round) -> Self {
        Self::Superseded {
            core: ErrorCore::new("fleet-oncall@", "a higher round won the slot", &SUPERSEDED),
            observed,
        }
    }

    pub fn below_snapshot(requested: Slot, first_slot: Slot) -> Self {
        Self::BelowSnapshot {
            core: ErrorCore::new(
                "fleet-oncall@",
                "access to a slot truncated by a snapshot",
                &BELOW_SNAPSHOT,
            )
            .with_info("requested", requested)
            .with_info("first_slot", first_slot),
            requested,
            first_slot,
        }
    }

    pub fn state_machine_reject(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::StateMachineReject {
            core: ErrorCore::new("fleet-oncall@", "state machine rejected a chosen command", &STATE_MACHINE_REJECT)
                .with_info("reason", reason.clone()),
            reason,
        }
    }

    pub fn unknown_command(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self::UnknownCommand {
            core: ErrorCore::new("fleet-oncall@", "apply saw an unrecognised command kind", &UNKNOWN_COMMAND)
                .with_info("kind", kind.clone()),
            kind,
        }
    }

    pub fn recovery_failure(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self::RecoveryFailure {
            core: ErrorCore::new("fleet-oncall@", "node could not recover state from any peer", &RECOVERY_FAILURE)
                .with_info("detail", detail.clone()),
            detail,
        }
    }

    pub fn transport_failure(what: impl Into<String>) -> Self {
        let what = what.into();
        Self::TransportFailure {
            core: ErrorCore::new("fleet-oncall@", "a network call to a peer or collaborator failed", &TRANSPORT_FAILURE)
                .with_info("what", what.clone()),
            what,
        }
    }
}

impl Default for Error {
    fn default() -> Self {
        Self::no_quorum()
    }
}

impl From<prototk::Error> for Error {
    fn from(what: prototk::Error) -> Self {
        Self::SerializationError {
            core: ErrorCore::new("fleet-oncall@", "prototk serialization failed", &SERIALIZATION_ERROR),
            what,
        }
    }
}

impl From<buffertk::Error> for Error {
    fn from(what: buffertk::Error) -> Self {
        Self::SerializationError {
            core: ErrorCore::new("fleet-oncall@", "buffertk serialization failed", &SERIALIZATION_ERROR),
            what: what.into(),
        }
    }
}

impl From<rpc_pb::Error> for Error {
    fn from(what: rpc_pb::Error) -> Self {
        Self::TransportFailure {
            core: ErrorCore::new("fleet-oncall@", "peer RPC failed", &TRANSPORT_FAILURE),
            what: what.to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(what: std::io::Error) -> Self {
        Self::TransportFailure {
            core: ErrorCore::new("fleet-oncall@", "transport I/O failed", &TRANSPORT_FAILURE),
            what: what.to_string(),
        }
    }
}

iotoz! {Error}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_orders_by_counter_then_node() {
        let a = Round { counter: 1, node: 5 };
        let b = Round { counter: 1, node: 9 };
        let c = Round { counter: 2, node: 0 };
        assert!(a < b);
        assert!(b < c);
        assert!(Round::BOTTOM < a);
    }

    #[test]
    fn round_next_always_supersedes() {
        let r = Round { counter: 7, node: 3 };
        let n = r.next(1);
        assert!(n > r);
    }

    #[test]
    fn error_carries_context() {
        let err = Error::below_snapshot(3, 10);
        let msg = err.long_form();
        assert!(msg.contains("requested"));
        assert!(msg.contains("first_slot"));
    }
}
