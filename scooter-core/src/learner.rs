//! The learner: answers the `ReplicationService` peer RPCs -- `learn` (mark a slot chosen),
//! `describe_state` and `fetch_snapshot`/`fetch_log_range` (the catch-up surface a recovering
//! peer drives). Learning and catch-up share one log/snapshot pair because both ultimately just
//! push values into the same [ReplicatedLog].

use std::sync::Arc;

use biometrics::Counter;
use rpc_pb::Context;

use scooter_directory::Directory;
use scooter_rpc::{
    DescribeStateRequest, DescribeStateResponse, FetchLogRangeRequest, FetchLogRangeResponse,
    FetchSnapshotRequest, FetchSnapshotResponse, LearnRequest, LearnResponse, ReplicationService,
};
use scooter_wire::Error;

use crate::log::ReplicatedLog;
use crate::snapshot::SnapshotEngine;

static LEARNS_RECEIVED: Counter = Counter::new("scooter.learner.learns_received");

pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&LEARNS_RECEIVED);
}

pub struct Learner {
    log: Arc<ReplicatedLog>,
    snapshot: Arc<SnapshotEngine>,
    directory: Arc<Directory>,
}

impl Learner {
    pub fn new(log: Arc<ReplicatedLog>, snapshot: Arc<SnapshotEngine>, directory: Arc<Directory>) -> Self {
        Self { log, snapshot, directory }
    }
}

impl ReplicationService for Learner {
    fn learn(&self, _ctx: &Context, req: LearnRequest) -> Result<LearnResponse, Error> {
        LEARNS_RECEIVED.click();
        self.log.mark_chosen(req.value.slot, req.value.command)?;
        Ok(LearnResponse {})
    }

    fn describe_state(&self, _ctx: &Context, _req: DescribeStateRequest) -> Result<DescribeStateResponse, Error> {
        Ok(DescribeStateResponse {
            first_slot: self.log.first_slot(),
            applied_index: self.log.applied_index().unwrap_or(0),
            node_id: self.directory.self_id(),
            leader_hint: self.directory.leader_hint(),
        })
    }

    fn fetch_snapshot(&self, _ctx: &Context, _req: FetchSnapshotRequest) -> Result<FetchSnapshotResponse, Error> {
        match self.snapshot.current() {
            Some(snap) => Ok(FetchSnapshotResponse {
                last_included_slot: snap.last_included_slot,
                state: snap.bytes,
            }),
            None => Ok(FetchSnapshotResponse { last_included_slot: 0, state: Vec::new() }),
        }
    }

    fn fetch_log_range(&self, _ctx: &Context, req: FetchLogRangeRequest) -> Result<FetchLogRangeResponse, Error> {
        let entries = self.log.fetch_range(req.lo, req.hi)?;
        Ok(FetchLogRangeResponse { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scooter_directory::PeerAddr;
    use scooter_statemachine::ScooterFleet;
    use scooter_wire::Command;

    fn ctx() -> Context {
        Context::default()
    }

    fn harness() -> Learner {
        let log = Arc::new(ReplicatedLog::new());
        let fleet = Arc::new(ScooterFleet::new());
        let snapshot = Arc::new(SnapshotEngine::new(log.clone(), fleet, 100));
        let directory = Arc::new(Directory::new(1, &[PeerAddr { node_id: 1, connect: "a:1".to_string() }]));
        Learner::new(log, snapshot, directory)
    }

    #[test]
    fn learn_marks_log_chosen() {
        let learner = harness();
        learner
            .learn(
                &ctx(),
                LearnRequest {
                    value: scooter_wire::LogValue {
                        slot: 0,
                        round: scooter_wire::Round::BOTTOM,
                        command: Command::Create { id: "s".to_string() },
                    },
                },
            )
            .unwrap();
        assert_eq!(learner.log.chosen_index(), Some(0));
    }

    #[test]
    fn describe_state_reports_current_watermarks() {
        let learner = harness();
        let resp = learner.describe_state(&ctx(), DescribeStateRequest {}).unwrap();
        assert_eq!(resp.first_slot, 0);
        assert_eq!(resp.node_id, 1);
    }

    #[test]
    fn fetch_log_range_below_snapshot_fails() {
        let learner = harness();
        for s in 0..3 {
            learner
                .log
                .mark_chosen(s, Command::Nop)
                .unwrap();
        }
        learner.log.truncate_below(2);
        assert!(learner.fetch_log_range(&ctx(), FetchLogRangeRequest { lo: 0, hi: 2 }).is_err());
        assert!(learner.fetch_log_range(&ctx(), FetchLogRangeRequest { lo: 2, hi: 2 }).is_ok());
    }
}
