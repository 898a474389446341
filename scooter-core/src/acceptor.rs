//! The acceptor: durably-in-memory per-slot promise/accept state.  The round comparison is the
//! crux of Paxos safety and the one place a sign error is catastrophic: Prepare must reject any
//! round that does not *strictly* exceed the promised round, while Accept must accept any round
//! that is *at least* the promised round (a proposer re-asserting its own already-promised round).

use std::collections::BTreeMap;
use std::sync::Mutex;

use biometrics::Counter;
use rpc_pb::Context;

use scooter_rpc::{AcceptRequest, AcceptResponse, AcceptorService, PrepareRequest, PrepareResponse};
use scooter_wire::{Command, Error, LogValue, Round, Slot};

static PREPARES_RECEIVED: Counter = Counter::new("scooter.acceptor.prepares_received");
static ACCEPTS_RECEIVED: Counter = Counter::new("scooter.acceptor.accepts_received");

pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&PREPARES_RECEIVED);
    collector.register_counter(&ACCEPTS_RECEIVED);
}

#[derive(Clone, Default)]
struct SlotState {
    promised: Round,
    accepted: Option<(Round, Command)>,
}

pub struct Acceptor {
    states: Mutex<BTreeMap<Slot, SlotState>>,
}

impl Default for Acceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Acceptor {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns (promised, ok, previously accepted value).
    fn local_prepare(&self, slot: Slot, round: Round) -> (Round, bool, Option<(Round, Command)>) {
        let mut states = self.states.lock().expect("acceptor lock poisoned");
        let state = states.entry(slot).or_default();
        if round > state.promised {
            state.promised = round;
            (state.promised, true, state.accepted.clone())
        } else {
            (state.promised, false, state.accepted.clone())
        }
    }

    /// Returns (accepted, promised-after).
    fn local_accept(&self, slot: Slot, round: Round, command: Command) -> (bool, Round) {
        let mut states = self.states.lock().expect("acceptor lock poisoned");
        let state = states.entry(slot).or_default();
        if round >= state.promised {
            state.promised = round;
            state.accepted = Some((round, command));
            (true, round)
        } else {
            (false, state.promised)
        }
    }

    /// Discard per-slot state below a newly installed snapshot's watermark; safe because a
    /// recovering node does not yet serve client or Paxos traffic for those slots.
    pub fn truncate_below(&self, first_slot: Slot) {
        let mut states = self.states.lock().expect("acceptor lock poisoned");
        *states = states.split_off(&first_slot);
    }
}

impl AcceptorService for Acceptor {
    fn prepare(&self, _ctx: &Context, req: PrepareRequest) -> Result<PrepareResponse, Error> {
        PREPARES_RECEIVED.click();
        let mut promised_out = Round::BOTTOM;
        let mut ok = true;
        let mut accepted = Vec::new();
        for slot in req.starting_slot..req.ending_slot {
            let (promised, slot_ok, prior) = self.local_prepare(slot, req.round);
            if promised > promised_out {
                promised_out = promised;
            }
            ok &= slot_ok;
            if let Some((round, command)) = prior {
                accepted.push(LogValue { slot, round, command });
            }
        }
        Ok(PrepareResponse {
            promised: promised_out,
            accepted,
            ok,
        })
    }

    fn accept(&self, _ctx: &Context, req: AcceptRequest) -> Result<AcceptResponse, Error> {
        ACCEPTS_RECEIVED.click();
        let (accepted, promised) =
            self.local_accept(req.value.slot, req.value.round, req.value.command);
        Ok(AcceptResponse { accepted, promised })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::default()
    }

    #[test]
    fn prepare_rejects_non_strictly_increasing_round() {
        let acceptor = Acceptor::new();
        let r1 = Round { counter: 1, node: 1 };
        let r1b = Round { counter: 1, node: 0 }; // smaller, same counter tie broken by node
        let resp = acceptor
            .prepare(&ctx(), PrepareRequest { round: r1, starting_slot: 0, ending_slot: 1 })
            .unwrap();
        assert!(resp.ok);
        let resp2 = acceptor
            .prepare(&ctx(), PrepareRequest { round: r1b, starting_slot: 0, ending_slot: 1 })
            .unwrap();
        assert!(!resp2.ok);
    }

    #[test]
    fn accept_respects_promised_round() {
        let acceptor = Acceptor::new();
        let low = Round { counter: 1, node: 0 };
        let high = Round { counter: 2, node: 0 };
        acceptor
            .prepare(&ctx(), PrepareRequest { round: high, starting_slot: 0, ending_slot: 1 })
            .unwrap();
        let resp = acceptor
            .accept(
                &ctx(),
                AcceptRequest {
                    value: LogValue { slot: 0, round: low, command: Command::Nop },
                },
            )
            .unwrap();
        assert!(!resp.accepted);
        assert_eq!(resp.promised, high);
    }

    #[test]
    fn accept_at_promised_round_succeeds() {
        let acceptor = Acceptor::new();
        let round = Round { counter: 1, node: 0 };
        acceptor
            .prepare(&ctx(), PrepareRequest { round, starting_slot: 0, ending_slot: 1 })
            .unwrap();
        let resp = acceptor
            .accept(
                &ctx(),
                AcceptRequest {
                    value: LogValue {
                        slot: 0,
                        round,
                        command: Command::Create { id: "s".to_string() },
                    },
                },
            )
            .unwrap();
        assert!(resp.accepted);
    }

    #[test]
    fn prepare_returns_previously_accepted_value() {
        let acceptor = Acceptor::new();
        let r1 = Round { counter: 1, node: 0 };
        let r2 = Round { counter: 2, node: 0 };
        acceptor
            .prepare(&ctx(), PrepareRequest { round: r1, starting_slot: 0, ending_slot: 1 })
            .unwrap();
        acceptor
            .accept(
                &ctx(),
                AcceptRequest {
                    value: LogValue {
                        slot: 0,
                        round: r1,
                        command: Command::Create { id: "s".to_string() },
                    },
                },
            )
            .unwrap();
        let resp = acceptor
            .prepare(&ctx(), PrepareRequest { round: r2, starting_slot: 0, ending_slot: 1 })
            .unwrap();
        assert!(resp.ok);
        assert_eq!(resp.accepted.len(), 1);
        assert_eq!(resp.accepted[0].command, Command::Create { id: "s".to_string() });
    }
}
