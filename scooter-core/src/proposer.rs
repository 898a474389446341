//! The proposer: drives one log slot through prepare/accept to a chosen value. Runs on the calling
//! HTTP-handler thread; the round-trip fan-out to acceptors uses one scoped thread per peer,
//! bounded by the (small, static) ensemble size.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use biometrics::Counter;
use rpc_pb::Context;

use scooter_directory::Directory;
use scooter_rpc::{AcceptRequest, AcceptorService, PeerChannels, PrepareRequest, ReplicationService};
use scooter_wire::{Command, Error, LogValue, NodeId, Round, Slot};

use crate::acceptor::Acceptor;
use crate::log::ReplicatedLog;

static PROPOSALS_STARTED: Counter = Counter::new("scooter.proposer.started");
static PROPOSALS_CHOSEN: Counter = Counter::new("scooter.proposer.chosen");
static PROPOSALS_SUPERSEDED: Counter = Counter::new("scooter.proposer.superseded");

pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&PROPOSALS_STARTED);
    collector.register_counter(&PROPOSALS_CHOSEN);
    collector.register_counter(&PROPOSALS_SUPERSEDED);
}

/// How many fresh slots `propose` will try before reporting `Superseded` to its caller. Bounded
/// so a thundering herd of concurrent proposers can't spin forever: each losing attempt consumes
/// one slot and moves on, and a live quorum guarantees some proposer's value wins every slot it
/// contests.
const MAX_PROPOSE_ATTEMPTS: usize = 32;

/// Drives consensus for one node. Holds its own round counter (monotonic, never reset) so a
/// proposer that restarts mid-ensemble still issues rounds higher than any it held before, as
/// long as `starting_counter` is seeded from the last-known round on recovery.
pub struct Proposer {
    node_id: NodeId,
    counter: AtomicU64,
    round_timeout: Duration,
}

impl Proposer {
    pub fn new(node_id: NodeId, starting_counter: u64, round_timeout: Duration) -> Self {
        Self {
            node_id,
            counter: AtomicU64::new(starting_counter),
            round_timeout,
        }
    }

    fn next_round(&self) -> Round {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Round { counter, node: self.node_id }
    }

    /// Force this proposer's round counter above `observed`, guaranteeing its next round
    /// supersedes the competitor that just beat it.
    fn advance_past(&self, observed: Round) {
        PROPOSALS_SUPERSEDED.click();
        self.counter.fetch_max(observed.counter, Ordering::SeqCst);
    }

    /// Assign an open slot and drive it to a chosen value carrying `command`. If a competing
    /// proposer's already-accepted value wins the slot instead (the prepare-phase rule in 4.1
    /// forces this proposer to re-propose it rather than `command`), that slot is permanently
    /// lost to this call -- it retries at the next open slot, up to [MAX_PROPOSE_ATTEMPTS] times,
    /// rather than reporting a slot whose chosen value is not the one this caller submitted.
    /// Exhausting the retry budget surfaces `Superseded`, per 4.1's "fails with... Superseded (a
    /// higher round from a competing proposer won)".
    pub fn propose(
        &self,
        log: &ReplicatedLog,
        local_acceptor: &Acceptor,
        directory: &Directory,
        peers: &PeerChannels,
        command: Command,
    ) -> Result<Slot, Error> {
        let mut last_observed = Round::BOTTOM;
        for _ in 0..MAX_PROPOSE_ATTEMPTS {
            let slot = log
                .chosen_index()
                .map(|s| s + 1)
                .unwrap_or_else(|| log.first_slot());
            let (chosen, origin) =
                self.run_slot(log, local_acceptor, directory, peers, slot, command.clone())?;
            if chosen == command {
                return Ok(slot);
            }
            last_observed = origin;
        }
        Err(Error::superseded(last_observed))
    }

    /// The inner Paxos loop for a single slot.  Returns the command that actually got chosen --
    /// which may differ from `preferred` if an earlier, already-accepted proposal wins instead --
    /// paired with the round that value was first accepted at (this proposer's own round, when
    /// `preferred` is what won).
    pub fn run_slot(
        &self,
        log: &ReplicatedLog,
        local_acceptor: &Acceptor,
        directory: &Directory,
        peers: &PeerChannels,
        slot: Slot,
        preferred: Command,
    ) -> Result<(Command, Round), Error> {
        PROPOSALS_STARTED.click();
        let quorum = directory.quorum_size();
        let round = self.next_round();

        let promises = self.fan_out_prepare(local_acceptor, peers, slot, round)?;
        if promises.len() < quorum {
            return Err(Error::no_quorum());
        }

        let forced = promises
            .iter()
            .filter_map(|p| p.accepted.clone())
            .max_by_key(|(round, _)| *round);
        let (value, origin) = match forced {
            Some((origin, command)) => (command, origin),
            None => (preferred, round),
        };

        let accepts = self.fan_out_accept(local_acceptor, peers, slot, round, value.clone())?;
        if accepts < quorum {
            return Err(Error::no_quorum());
        }

        log.mark_chosen(slot, value.clone())?;
        PROPOSALS_CHOSEN.click();
        directory.set_leader_hint(self.node_id);
        self.broadcast_learn(peers, slot, round, value.clone());
        Ok((value, origin))
    }

    fn fan_out_prepare(
        &self,
        local_acceptor: &Acceptor,
        peers: &PeerChannels,
        slot: Slot,
        round: Round,
    ) -> Result<Vec<Promise>, Error> {
        let req = PrepareRequest { round, starting_slot: slot, ending_slot: slot + 1 };
        let local = local_acceptor.prepare(&Context::default(), req.clone())?;
        let mut promises = Vec::new();
        if local.ok {
            promises.push(Promise { accepted: local.accepted.last().map(|v| (v.round, v.command.clone())) });
        } else if local.promised > round {
            self.advance_past(local.promised);
        }

        let results = thread::scope(|scope| {
            let handles: Vec<_> = peers
                .all()
                .map(|peer| {
                    let req = req.clone();
                    scope.spawn(move || peer.acceptor.prepare(&scooter_rpc::fresh_context(), req))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
        });

        for result in results {
            match result {
                Ok(resp) => {
                    if resp.ok {
                        promises.push(Promise {
                            accepted: resp.accepted.last().map(|v| (v.round, v.command.clone())),
                        });
                    } else if resp.promised > round {
                        self.advance_past(resp.promised);
                    }
                }
                Err(_) => continue, // transient peer failure: counted against quorum, not fatal
            }
        }
        Ok(promises)
    }

    fn fan_out_accept(
        &self,
        local_acceptor: &Acceptor,
        peers: &PeerChannels,
        slot: Slot,
        round: Round,
        command: Command,
    ) -> Result<usize, Error> {
        let value = LogValue { slot, round, command };
        let req = AcceptRequest { value: value.clone() };

        let mut accepted = 0usize;
        let local = local_acceptor.accept(&Context::default(), req.clone())?;
        if local.accepted {
            accepted += 1;
        } else if local.promised > round {
            self.advance_past(local.promised);
        }

        let results = thread::scope(|scope| {
            let handles: Vec<_> = peers
                .all()
                .map(|peer| {
                    let req = req.clone();
                    scope.spawn(move || peer.acceptor.accept(&scooter_rpc::fresh_context(), req))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
        });

        for result in results {
            match result {
                Ok(resp) => {
                    if resp.accepted {
                        accepted += 1;
                    } else if resp.promised > round {
                        self.advance_past(resp.promised);
                    }
                }
                Err(_) => continue,
            }
        }
        Ok(accepted)
    }

    /// Fire-and-forget notification to every peer's learner. A dropped Learn is made up for by
    /// catch-up, never retried here.
    fn broadcast_learn(&self, peers: &PeerChannels, slot: Slot, round: Round, command: Command) {
        let value = LogValue { slot, round, command };
        thread::scope(|scope| {
            for peer in peers.all() {
                let value = value.clone();
                scope.spawn(move || {
                    let _ = peer
                        .replication
                        .learn(&scooter_rpc::fresh_context(), scooter_rpc::LearnRequest { value });
                });
            }
        });
    }
}

struct Promise {
    accepted: Option<(Round, Command)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_counter_advances_past_observed_competitor() {
        let proposer = Proposer::new(1, 0, Duration::from_millis(100));
        let r1 = proposer.next_round();
        assert_eq!(r1, Round { counter: 1, node: 1 });
        proposer.advance_past(Round { counter: 10, node: 9 });
        let r2 = proposer.next_round();
        assert!(r2 > Round { counter: 10, node: 9 });
    }
}
