//! The applier: the single thread permitted to call into the state machine. Drains chosen slots
//! from the replicated log in strict slot order and applies each exactly once, holding the
//! snapshot engine's freeze lock for the duration of every apply so a concurrent snapshot can
//! never observe a half-applied command.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use biometrics::Counter;

use scooter_statemachine::{ApplyOutcome, ScooterFleet};
use scooter_wire::{Command, Slot};
use zerror::Z;

use crate::acceptor::Acceptor;
use crate::log::ReplicatedLog;
use crate::snapshot::SnapshotEngine;

static COMMANDS_APPLIED: Counter = Counter::new("scooter.applier.applied");
static COMMANDS_REJECTED: Counter = Counter::new("scooter.applier.rejected");

pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&COMMANDS_APPLIED);
    collector.register_counter(&COMMANDS_REJECTED);
}

/// How many recent apply outcomes to retain for [Applier::outcome_for] lookups. Bounded so a
/// long-running node's outcome cache can't grow without end; callers that wait past the window
/// (an unusually slow recovering caller racing a snapshot) fall back to reporting the outcome as
/// unavailable rather than stale.
const OUTCOME_RETENTION: usize = 4096;

pub struct Applier {
    log: Arc<ReplicatedLog>,
    state_machine: Arc<ScooterFleet>,
    snapshot: Arc<SnapshotEngine>,
    acceptor: Arc<Acceptor>,
    outcomes: Mutex<BTreeMap<Slot, Result<ApplyOutcome, String>>>,
}

impl Applier {
    pub fn new(
        log: Arc<ReplicatedLog>,
        state_machine: Arc<ScooterFleet>,
        snapshot: Arc<SnapshotEngine>,
        acceptor: Arc<Acceptor>,
    ) -> Self {
        Self {
            log,
            state_machine,
            snapshot,
            acceptor,
            outcomes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Look up the result of applying `slot`, if it is still held in the retention window.
    pub fn outcome_for(&self, slot: Slot) -> Option<Result<ApplyOutcome, String>> {
        self.outcomes
            .lock()
            .expect("applier outcome lock poisoned")
            .get(&slot)
            .cloned()
    }

    /// Apply every chosen-but-not-yet-applied slot currently available, without blocking.
    /// Returns the number of commands applied.
    pub fn drain_available(&self) -> usize {
        let mut applied = 0;
        while let Some((slot, command)) = self.log.wait_for_next_chosen(Duration::from_millis(0)) {
            self.apply_one(slot, command);
            applied += 1;
        }
        applied
    }

    fn apply_one(&self, slot: u64, command: Command) {
        let _freeze = self
            .snapshot
            .freeze_lock()
            .lock()
            .expect("snapshot freeze lock poisoned");
        let result = self.state_machine.apply(&command);
        match &result {
            Ok(_) => COMMANDS_APPLIED.click(),
            Err(_) => COMMANDS_REJECTED.click(), // rejection is a value, not a retry: slot still applies
        }
        drop(_freeze);
        {
            let mut outcomes = self.outcomes.lock().expect("applier outcome lock poisoned");
            outcomes.insert(slot, result.map_err(|e| e.long_form()));
            while outcomes.len() > OUTCOME_RETENTION {
                let oldest = *outcomes.keys().next().expect("non-empty");
                outcomes.remove(&oldest);
            }
        }
        self.log.mark_applied(slot);
        match self.snapshot.maybe_snapshot() {
            Ok(()) => self.acceptor.truncate_below(self.log.first_slot()),
            Err(err) => eprintln!("log compaction failed after applying slot {slot}: {}", err.long_form()),
        }
    }

    /// Run the applier loop on a dedicated thread until `shutdown` is observed.
    pub fn spawn(self: Arc<Self>, shutdown: Arc<std::sync::atomic::AtomicBool>) -> JoinHandle<()> {
        std::thread::spawn(move || {
            while !shutdown.load(std::sync::atomic::Ordering::Relaxed) {
                match self.log.wait_for_next_chosen(Duration::from_millis(200)) {
                    Some((slot, command)) => self.apply_one(slot, command),
                    None => continue,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harness() -> (Arc<ReplicatedLog>, Arc<ScooterFleet>, Applier) {
        let log = Arc::new(ReplicatedLog::new());
        let fleet = Arc::new(ScooterFleet::new());
        let snapshot = Arc::new(SnapshotEngine::new(log.clone(), fleet.clone(), 1_000_000));
        let acceptor = Arc::new(Acceptor::new());
        let applier = Applier::new(log.clone(), fleet.clone(), snapshot, acceptor);
        (log, fleet, applier)
    }

    #[test]
    fn drain_applies_contiguous_chosen_slots_in_order() {
        let (log, fleet, applier) = harness();
        log.mark_chosen(0, Command::Create { id: "a".to_string() }).unwrap();
        log.mark_chosen(1, Command::Reserve { id: "a".to_string(), reservation_id: "r1".to_string() }).unwrap();
        let n = applier.drain_available();
        assert_eq!(n, 2);
        assert_eq!(log.applied_index(), Some(1));
        assert!(!fleet.get("a").unwrap().is_available);
    }

    #[test]
    fn drain_stops_at_gap() {
        let (log, _fleet, applier) = harness();
        log.mark_chosen(1, Command::Nop).unwrap(); // slot 0 never chosen
        let n = applier.drain_available();
        assert_eq!(n, 0);
        assert_eq!(log.applied_index(), None);
    }

    #[test]
    fn rejection_still_advances_applied_index() {
        let (log, _fleet, applier) = harness();
        log.mark_chosen(0, Command::Reserve { id: "missing".to_string(), reservation_id: "r".to_string() }).unwrap();
        let n = applier.drain_available();
        assert_eq!(n, 1);
        assert_eq!(log.applied_index(), Some(0));
    }

    #[test]
    fn outcome_for_reports_success_and_rejection() {
        let (log, _fleet, applier) = harness();
        log.mark_chosen(0, Command::Create { id: "a".to_string() }).unwrap();
        log.mark_chosen(1, Command::Create { id: "a".to_string() }).unwrap();
        applier.drain_available();
        assert!(matches!(applier.outcome_for(0), Some(Ok(ApplyOutcome::Created(_)))));
        let rejected = applier.outcome_for(1).unwrap();
        assert!(rejected.is_err());
        assert!(applier.outcome_for(2).is_none());
    }
}
