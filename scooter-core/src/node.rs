//! The `Node` aggregate: the single owner of every replication component for one process. This is
//! the one place global state is allowed to live -- everything else reaches it only through a
//! component interface, never through ambient statics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use rpc_pb::Context;

use scooter_directory::Directory;
use scooter_rpc::{
    AcceptRequest, AcceptResponse, AcceptorService, DescribeStateRequest, DescribeStateResponse,
    FetchLogRangeRequest, FetchLogRangeResponse, FetchSnapshotRequest, FetchSnapshotResponse,
    LearnRequest, LearnResponse, PeerChannels, PrepareRequest, PrepareResponse, ReplicationService,
};
use scooter_statemachine::{ApplyOutcome, Record, ScooterFleet};
use scooter_wire::{Command, Error, NodeId, Slot};

use crate::acceptor::Acceptor;
use crate::applier::Applier;
use crate::learner::Learner;
use crate::log::ReplicatedLog;
use crate::proposer::Proposer;
use crate::snapshot::SnapshotEngine;

pub struct NodeOptions {
    pub node_id: NodeId,
    pub log_compaction_threshold: u64,
    pub round_timeout: Duration,
    pub recovery_timeout: Duration,
}

/// One node's full replication stack: a replicated log, an acceptor, a proposer, a learner, an
/// applier thread, a snapshot engine, and the domain state machine they all drive.
pub struct Node {
    directory: Arc<Directory>,
    peers: PeerChannels,
    log: Arc<ReplicatedLog>,
    acceptor: Arc<Acceptor>,
    proposer: Proposer,
    learner: Learner,
    applier: Arc<Applier>,
    snapshot: Arc<SnapshotEngine>,
    state_machine: Arc<ScooterFleet>,
    applier_shutdown: Arc<AtomicBool>,
    applier_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    round_timeout: Duration,
    recovery_timeout: Duration,
}

impl Node {
    pub fn new(directory: Arc<Directory>, peers: PeerChannels, options: NodeOptions) -> Self {
        let log = Arc::new(ReplicatedLog::new());
        let state_machine = Arc::new(ScooterFleet::new());
        let snapshot = Arc::new(SnapshotEngine::new(
            log.clone(),
            state_machine.clone(),
            options.log_compaction_threshold,
        ));
        let learner = Learner::new(log.clone(), snapshot.clone(), directory.clone());
        let acceptor = Arc::new(Acceptor::new());
        let applier = Arc::new(Applier::new(
            log.clone(),
            state_machine.clone(),
            snapshot.clone(),
            acceptor.clone(),
        ));
        let proposer = Proposer::new(options.node_id, 0, options.round_timeout);
        Self {
            directory,
            peers,
            log,
            acceptor,
            proposer,
            learner,
            applier,
            snapshot,
            state_machine,
            applier_shutdown: Arc::new(AtomicBool::new(false)),
            applier_handle: std::sync::Mutex::new(None),
            round_timeout: options.round_timeout,
            recovery_timeout: options.recovery_timeout,
        }
    }

    /// Run startup recovery synchronously, then start the applier's background thread. Must be
    /// called before the node's HTTP and peer listeners accept traffic.
    pub fn recover_and_start(&self) -> Result<(), Error> {
        crate::recovery::RecoveryCoordinator::run(
            &self.directory,
            &self.peers,
            &self.log,
            &self.snapshot,
            &self.applier,
            self.recovery_timeout,
        )?;
        let handle = self.applier.clone().spawn(self.applier_shutdown.clone());
        *self.applier_handle.lock().expect("applier handle lock poisoned") = Some(handle);
        Ok(())
    }

    pub fn shutdown(&self) {
        self.applier_shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.applier_handle.lock().expect("applier handle lock poisoned").take() {
            let _ = handle.join();
        }
    }

    /// Submit a command for replication, returning the slot it was chosen at once a quorum
    /// agrees. Fails with `NotLeader` if this node should not be originating proposals right now.
    pub fn propose(&self, command: Command) -> Result<Slot, Error> {
        if self.directory.leader_hint() != self.directory.self_id() && !self.peers.is_empty() {
            return Err(Error::not_leader(Some(self.directory.leader_hint())));
        }
        let slot = self
            .proposer
            .propose(&self.log, &self.acceptor, &self.directory, &self.peers, command)?;
        self.log.wait_until_applied(slot, self.round_timeout * 4);
        Ok(slot)
    }

    /// Submit a command and report what actually happened when it was applied, distinguishing a
    /// domain-level rejection (the command was chosen and applied, but the state machine refused
    /// it) from a replication-level failure. This is the entry point the HTTP layer uses: it needs
    /// the former to answer with 404/409, not just confirmation that consensus was reached.
    pub fn submit(&self, command: Command) -> Result<ApplyOutcome, Error> {
        let slot = self.propose(command)?;
        match self.applier.outcome_for(slot) {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(reason)) => Err(Error::state_machine_reject(reason)),
            None => Err(Error::state_machine_reject(
                "apply outcome no longer available (truncated by a snapshot)",
            )),
        }
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        self.state_machine.get(id)
    }

    pub fn get_all(&self) -> Vec<Record> {
        self.state_machine.get_all()
    }

    pub fn is_leader(&self) -> bool {
        self.directory.leader_hint() == self.directory.self_id() || self.peers.is_empty()
    }

    pub fn leader_hint(&self) -> NodeId {
        self.directory.leader_hint()
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn force_snapshot(&self) -> Result<(), Error> {
        self.snapshot.force_snapshot()?;
        self.acceptor.truncate_below(self.log.first_slot());
        Ok(())
    }
}

/// A cheap, cloneable handle hosting [Node]'s `ReplicationService` surface. `busyrpc::Server`
/// takes ownership of the services it hosts, so the node itself is never moved into the registry
/// -- only a handle onto its shared `Arc` is.
#[derive(Clone)]
pub struct ReplicationHandle(pub Arc<Node>);

impl ReplicationService for ReplicationHandle {
    fn learn(&self, ctx: &Context, req: LearnRequest) -> Result<LearnResponse, Error> {
        self.0.learner.learn(ctx, req)
    }

    fn describe_state(&self, ctx: &Context, req: DescribeStateRequest) -> Result<DescribeStateResponse, Error> {
        self.0.learner.describe_state(ctx, req)
    }

    fn fetch_snapshot(&self, ctx: &Context, req: FetchSnapshotRequest) -> Result<FetchSnapshotResponse, Error> {
        self.0.learner.fetch_snapshot(ctx, req)
    }

    fn fetch_log_range(&self, ctx: &Context, req: FetchLogRangeRequest) -> Result<FetchLogRangeResponse, Error> {
        self.0.learner.fetch_log_range(ctx, req)
    }
}

/// The analogous handle for [Node]'s `AcceptorService` surface.
#[derive(Clone)]
pub struct AcceptorHandle(pub Arc<Node>);

impl AcceptorService for AcceptorHandle {
    fn prepare(&self, ctx: &Context, req: PrepareRequest) -> Result<PrepareResponse, Error> {
        self.0.acceptor.prepare(ctx, req)
    }

    fn accept(&self, ctx: &Context, req: AcceptRequest) -> Result<AcceptResponse, Error> {
        self.0.acceptor.accept(ctx, req)
    }
}
