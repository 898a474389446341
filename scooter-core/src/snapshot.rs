//! Log compaction. Implements the explicit-freeze design: a snapshot is taken by acquiring the
//! same freeze lock the applier holds for the duration of one `Apply` call, so `stateMachine
//! .snapshot()` can never observe (or race) a partial mutation.

use std::sync::Mutex;

use biometrics::Counter;

use scooter_statemachine::ScooterFleet;
use scooter_wire::{Error, Slot};

use crate::log::ReplicatedLog;

static SNAPSHOTS_TAKEN: Counter = Counter::new("scooter.snapshot.taken");
static SNAPSHOTS_INSTALLED: Counter = Counter::new("scooter.snapshot.installed");

pub fn register_biometrics(collector: &biometrics::Collector) {
    collector.register_counter(&SNAPSHOTS_TAKEN);
    collector.register_counter(&SNAPSHOTS_INSTALLED);
}

#[derive(Clone, Debug)]
pub struct Snapshot {
    pub last_included_slot: Slot,
    pub bytes: Vec<u8>,
}

pub struct SnapshotEngine {
    log: std::sync::Arc<ReplicatedLog>,
    state_machine: std::sync::Arc<ScooterFleet>,
    freeze: Mutex<()>,
    current: Mutex<Option<Snapshot>>,
    compaction_threshold: u64,
}

impl SnapshotEngine {
    pub fn new(
        log: std::sync::Arc<ReplicatedLog>,
        state_machine: std::sync::Arc<ScooterFleet>,
        compaction_threshold: u64,
    ) -> Self {
        Self {
            log,
            state_machine,
            freeze: Mutex::new(()),
            current: Mutex::new(None),
            compaction_threshold,
        }
    }

    /// The lock the applier must hold across each `Apply` call so a concurrent snapshot can never
    /// observe a half-applied command.
    pub fn freeze_lock(&self) -> &Mutex<()> {
        &self.freeze
    }

    /// Called by the applier after each apply; snapshots only when the log has grown past the
    /// configured threshold above `firstSlot`.
    pub fn maybe_snapshot(&self) -> Result<(), Error> {
        let applied = match self.log.applied_index() {
            Some(a) => a,
            None => return Ok(()),
        };
        if applied.saturating_sub(self.log.first_slot()) >= self.compaction_threshold {
            self.force_snapshot()?;
        }
        Ok(())
    }

    /// Trigger a snapshot regardless of threshold, e.g. from the HTTP `/snapshot` endpoint.
    pub fn force_snapshot(&self) -> Result<(), Error> {
        let _freeze = self.freeze.lock().expect("snapshot freeze lock poisoned");
        let applied = match self.log.applied_index() {
            Some(a) => a,
            None => return Ok(()),
        };
        let bytes = self.state_machine.snapshot();
        *self.current.lock().expect("snapshot lock poisoned") = Some(Snapshot {
            last_included_slot: applied,
            bytes,
        });
        self.log.truncate_below(applied + 1);
        SNAPSHOTS_TAKEN.click();
        Ok(())
    }

    pub fn current(&self) -> Option<Snapshot> {
        self.current.lock().expect("snapshot lock poisoned").clone()
    }

    /// Install a snapshot fetched from a peer during recovery (or catch-up). A no-op if local
    /// state is already at least as advanced.
    pub fn install(&self, last_included_slot: Slot, bytes: Vec<u8>) -> Result<(), Error> {
        let _freeze = self.freeze.lock().expect("snapshot freeze lock poisoned");
        let ahead = self
            .log
            .applied_index()
            .map(|a| last_included_slot <= a)
            .unwrap_or(false);
        if ahead {
            return Ok(());
        }
        self.state_machine.load(&bytes)?;
        self.log.fast_forward(last_included_slot);
        *self.current.lock().expect("snapshot lock poisoned") = Some(Snapshot {
            last_included_slot,
            bytes,
        });
        SNAPSHOTS_INSTALLED.click();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scooter_wire::Command;

    fn harness() -> (std::sync::Arc<ReplicatedLog>, std::sync::Arc<ScooterFleet>, SnapshotEngine) {
        let log = std::sync::Arc::new(ReplicatedLog::new());
        let fleet = std::sync::Arc::new(ScooterFleet::new());
        let engine = SnapshotEngine::new(log.clone(), fleet.clone(), 100);
        (log, fleet, engine)
    }

    #[test]
    fn force_snapshot_truncates_log_and_captures_state() {
        let (log, fleet, engine) = harness();
        log.mark_chosen(0, Command::Create { id: "s".to_string() }).unwrap();
        fleet.apply(&Command::Create { id: "s".to_string() }).unwrap();
        log.mark_applied(0);

        engine.force_snapshot().unwrap();
        let snap = engine.current().unwrap();
        assert_eq!(snap.last_included_slot, 0);
        assert_eq!(log.first_slot(), 1);
    }

    #[test]
    fn install_is_noop_when_local_state_is_ahead() {
        let (log, fleet, engine) = harness();
        log.mark_chosen(0, Command::Create { id: "s".to_string() }).unwrap();
        fleet.apply(&Command::Create { id: "s".to_string() }).unwrap();
        log.mark_applied(0);

        engine.install(0, fleet.snapshot()).unwrap();
        assert_eq!(log.first_slot(), 0); // unchanged: local was already >= lastIncludedSlot
    }

    #[test]
    fn install_advances_fresh_node() {
        let fleet_src = ScooterFleet::new();
        fleet_src.apply(&Command::Create { id: "s".to_string() }).unwrap();
        let bytes = fleet_src.snapshot();

        let (log, fleet, engine) = harness();
        engine.install(5, bytes).unwrap();
        assert_eq!(log.first_slot(), 6);
        assert_eq!(log.applied_index(), Some(5));
        assert!(fleet.get("s").is_some());
    }
}
