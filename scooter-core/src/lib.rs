//! MultiPaxos replication core for the scooter-fleet store: the proposer/acceptor/learner
//! consensus loop, the slot-keyed replicated log, the single-threaded applier, explicit-freeze
//! snapshotting, and startup recovery -- wired together by [node::Node].

pub mod acceptor;
pub mod applier;
pub mod learner;
pub mod log;
pub mod node;
pub mod proposer;
pub mod recovery;
pub mod snapshot;

pub use acceptor::Acceptor;
pub use applier::Applier;
pub use learner::Learner;
pub use log::ReplicatedLog;
pub use node::{AcceptorHandle, Node, NodeOptions, ReplicationHandle};
pub use proposer::Proposer;
pub use recovery::RecoveryCoordinator;
pub use snapshot::{Snapshot, SnapshotEngine};

/// Register every counter this crate and its wire-type collaborator declare, matching the
/// `register_biometrics(&mut Collector)` convention `busyrpc`'s server module uses.
pub fn register_biometrics(collector: &biometrics::Collector) {
    scooter_wire::register_biometrics(collector);
    acceptor::register_biometrics(collector);
    applier::register_biometrics(collector);
    learner::register_biometrics(collector);
    proposer::register_biometrics(collector);
    recovery::register_biometrics(collector);
    snapshot::register_biometrics(collector);
}
