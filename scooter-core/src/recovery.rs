//! Startup recovery. Runs once, synchronously, before the node's HTTP and peer listeners open:
//! contact every peer for its watermarks, pull a snapshot if one exists, then replay the log gap
//! through the ordinary learner/applier path so double-delivery is handled the same way it would
//! be in steady state.

use std::time::{Duration, Instant};

use biometrics::Counter;

use scooter_directory::Directory;
use scooter_rpc::{DescribeStateRequest, FetchLogRangeRequest, FetchSnapshotRequest, PeerChannels, ReplicationService};
use scooter_wire::Error;

use crate::applier::Applier;
use crate::log::ReplicatedLog;
use crate::snapshot::SnapshotEngine;

static RECOVERY_ATTEMPTS: Counter = Counter::new("scooter.recovery.attempts");
static RECOVERY_FAILURES: Counter = Counter::new("scooter.recovery.failures");

pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&RECOVERY_ATTEMPTS);
    collector.register_counter(&RECOVERY_FAILURES);
}

struct Candidate {
    node_id: u64,
    applied_index: u64,
    first_slot: u64,
}

pub struct RecoveryCoordinator;

impl RecoveryCoordinator {
    /// Drive the node from a cold `RECOVERING` state to caught-up, ready to transition `ACTIVE`.
    pub fn run(
        directory: &Directory,
        peers: &PeerChannels,
        log: &ReplicatedLog,
        snapshot: &SnapshotEngine,
        applier: &Applier,
        recovery_timeout: Duration,
    ) -> Result<(), Error> {
        RECOVERY_ATTEMPTS.click();
        if peers.is_empty() {
            return Ok(()); // single-node ensemble: nothing to catch up from but itself
        }
        let deadline = Instant::now() + recovery_timeout;

        let mut candidates = Self::describe_all(peers, deadline);
        candidates.sort_by(|a, b| b.applied_index.cmp(&a.applied_index));

        if candidates.is_empty() {
            RECOVERY_FAILURES.click();
            return Err(Error::recovery_failure("no peer answered describe_state during recovery"));
        }

        for candidate in candidates {
            match Self::catch_up_from(directory, peers, log, snapshot, &candidate, deadline) {
                Ok(()) => {
                    applier.drain_available();
                    return Ok(());
                }
                Err(_) => continue, // try the next-best peer; resumable since applier never regresses
            }
        }

        RECOVERY_FAILURES.click();
        Err(Error::recovery_failure("every catch-up candidate failed before completion"))
    }

    fn describe_all(peers: &PeerChannels, deadline: Instant) -> Vec<Candidate> {
        let mut out = Vec::new();
        for peer in peers.all() {
            if Instant::now() >= deadline {
                break;
            }
            if let Ok(resp) = peer
                .replication
                .describe_state(&scooter_rpc::fresh_context(), DescribeStateRequest {})
            {
                out.push(Candidate {
                    node_id: peer.node_id,
                    applied_index: resp.applied_index,
                    first_slot: resp.first_slot,
                });
            }
        }
        out
    }

    fn catch_up_from(
        directory: &Directory,
        peers: &PeerChannels,
        log: &ReplicatedLog,
        snapshot: &SnapshotEngine,
        candidate: &Candidate,
        deadline: Instant,
    ) -> Result<(), Error> {
        let peer = peers
            .get(candidate.node_id)
            .ok_or_else(|| Error::recovery_failure("candidate vanished from directory"))?;

        if candidate.first_slot > 0 {
            let resp = peer
                .replication
                .fetch_snapshot(&scooter_rpc::fresh_context(), FetchSnapshotRequest {})?;
            snapshot.install(resp.last_included_slot, resp.state)?;
        }

        let lo = log.applied_index().map(|a| a + 1).unwrap_or(log.first_slot());
        if candidate.applied_index < lo {
            directory.set_leader_hint(candidate.node_id);
            return Ok(()); // candidate has nothing new beyond what the snapshot already gave us
        }
        if Instant::now() >= deadline {
            return Err(Error::recovery_failure("recovery timed out fetching log range"));
        }

        let resp = peer
            .replication
            .fetch_log_range(&scooter_rpc::fresh_context(), FetchLogRangeRequest { lo, hi: candidate.applied_index })?;
        for entry in resp.entries {
            log.mark_chosen(entry.slot, entry.command)?;
        }
        directory.set_leader_hint(candidate.node_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use busyrpc::ClientOptions;
    use scooter_directory::PeerAddr;
    use scooter_statemachine::ScooterFleet;
    use std::sync::Arc;

    #[test]
    fn single_node_ensemble_recovers_trivially() {
        let addrs = vec![PeerAddr { node_id: 7, connect: "unused:0".to_string() }];
        let directory = Directory::new(7, &addrs);
        let peers = PeerChannels::connect(&directory, ClientOptions::default()).unwrap();
        let log = Arc::new(ReplicatedLog::new());
        let fleet = Arc::new(ScooterFleet::new());
        let snapshot = Arc::new(SnapshotEngine::new(log.clone(), fleet.clone(), 1000));
        let acceptor = Arc::new(crate::acceptor::Acceptor::new());
        let applier = Applier::new(log.clone(), fleet, snapshot.clone(), acceptor);

        let result = RecoveryCoordinator::run(
            &directory,
            &peers,
            &log,
            &snapshot,
            &applier,
            Duration::from_millis(50),
        );
        assert!(result.is_ok());
    }
}
