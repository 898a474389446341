//! The domain state machine the replication core applies chosen log entries against: a fleet of
//! scooters, each either available or reserved, accumulating distance traveled.
//!
//! This is deliberately a thin collaborator (the spec's explicit non-goal): the interesting work
//! is the `Apply`/`Snapshot`/`Load` contract the core drives it through, not the domain logic
//! itself.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use scooter_wire::{Command, Error};

///////////////////////////////////////////// Record ////////////////////////////////////////////

/// One scooter's durable state.  `total_distance` is exact integer arithmetic throughout; a
/// floating-point accumulator would silently lose precision over many releases, which is exactly
/// the defect this design note calls out.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Record {
    pub id: String,
    pub is_available: bool,
    pub current_reservation_id: String,
    pub total_distance: u64,
}

/// The result of applying a command: either it took effect, or the state machine rejected it.
/// Either way the command was chosen and applied -- rejection is a value, not a retry signal.
#[derive(Clone, Debug, PartialEq)]
pub enum ApplyOutcome {
    Created(Record),
    Reserved(Record),
    Released(Record),
}

//////////////////////////////////////////// ScooterFleet ///////////////////////////////////////

/// The applier's collaborator.  Exposed behind a mutex because read endpoints (`get`/`get_all`)
/// are served from HTTP handler threads concurrently with the applier thread's `apply` calls;
/// every read returns an owned copy so a caller never observes a record mid-mutation.
pub struct ScooterFleet {
    records: Mutex<BTreeMap<String, Record>>,
}

impl Default for ScooterFleet {
    fn default() -> Self {
        Self::new()
    }
}

impl ScooterFleet {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
        }
    }

    /// Apply one chosen command.  Called exactly once per slot, in slot order, by the applier.
    pub fn apply(&self, command: &Command) -> Result<ApplyOutcome, Error> {
        let mut records = self.records.lock().expect("scooter fleet lock poisoned");
        match command {
            Command::Nop => Ok(ApplyOutcome::Created(Record::default())),
            Command::Create { id } => {
                if records.contains_key(id) {
                    return Err(Error::state_machine_reject(format!(
                        "scooter {id} already exists"
                    )));
                }
                let record = Record {
                    id: id.clone(),
                    is_available: true,
                    current_reservation_id: String::new(),
                    total_distance: 0,
                };
                records.insert(id.clone(), record.clone());
                Ok(ApplyOutcome::Created(record))
            }
            Command::Reserve { id, reservation_id } => {
                let record = records
                    .get_mut(id)
                    .ok_or_else(|| Error::state_machine_reject(format!("scooter {id} not found")))?;
                if !record.is_available {
                    return Err(Error::state_machine_reject(format!(
                        "scooter {id} already reserved"
                    )));
                }
                record.is_available = false;
                record.current_reservation_id = reservation_id.clone();
                Ok(ApplyOutcome::Reserved(record.clone()))
            }
            Command::Release { id, distance } => {
                let record = records
                    .get_mut(id)
                    .ok_or_else(|| Error::state_machine_reject(format!("scooter {id} not found")))?;
                if record.is_available {
                    return Err(Error::state_machine_reject(format!(
                        "scooter {id} is not reserved"
                    )));
                }
                record.is_available = true;
                record.current_reservation_id.clear();
                record.total_distance = record.total_distance.saturating_add(*distance);
                Ok(ApplyOutcome::Released(record.clone()))
            }
        }
    }

    /// Capture the full state for the snapshot engine.  Human-inspectable JSON is fine here: this
    /// bytes blob never crosses the Paxos wire, only the boundary between the snapshot engine and
    /// this state machine.
    pub fn snapshot(&self) -> Vec<u8> {
        let records = self.records.lock().expect("scooter fleet lock poisoned");
        let all: Vec<&Record> = records.values().collect();
        serde_json::to_vec(&all).expect("scooter records always serialize")
    }

    /// Replace the entire state.  Idempotent: loading the same bytes twice in a row is a no-op
    /// the second time because the result is identical by construction.
    pub fn load(&self, bytes: &[u8]) -> Result<(), Error> {
        let all: Vec<Record> = serde_json::from_slice(bytes).map_err(|e| {
            Error::state_machine_reject(format!("corrupt snapshot: {e}"))
        })?;
        let mut records = self.records.lock().expect("scooter fleet lock poisoned");
        records.clear();
        for record in all {
            records.insert(record.id.clone(), record);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Record> {
        let records = self.records.lock().expect("scooter fleet lock poisoned");
        records.get(id).cloned()
    }

    pub fn get_all(&self) -> Vec<Record> {
        let records = self.records.lock().expect("scooter fleet lock poisoned");
        records.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_reserve_release_cycle() {
        let fleet = ScooterFleet::new();
        fleet
            .apply(&Command::Create { id: "s1".to_string() })
            .unwrap();
        fleet
            .apply(&Command::Reserve {
                id: "s1".to_string(),
                reservation_id: "r1".to_string(),
            })
            .unwrap();
        fleet
            .apply(&Command::Release {
                id: "s1".to_string(),
                distance: 100,
            })
            .unwrap();
        let record = fleet.get("s1").unwrap();
        assert!(record.is_available);
        assert_eq!(record.total_distance, 100);
        assert_eq!(record.current_reservation_id, "");
    }

    #[test]
    fn duplicate_create_rejected() {
        let fleet = ScooterFleet::new();
        fleet
            .apply(&Command::Create { id: "s2".to_string() })
            .unwrap();
        let err = fleet
            .apply(&Command::Create { id: "s2".to_string() })
            .unwrap_err();
        assert!(matches!(err, Error::StateMachineReject { .. }));
    }

    #[test]
    fn double_reserve_rejected() {
        let fleet = ScooterFleet::new();
        fleet
            .apply(&Command::Create { id: "s3".to_string() })
            .unwrap();
        fleet
            .apply(&Command::Reserve {
                id: "s3".to_string(),
                reservation_id: "r1".to_string(),
            })
            .unwrap();
        let err = fleet
            .apply(&Command::Reserve {
                id: "s3".to_string(),
                reservation_id: "r2".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::StateMachineReject { .. }));
    }

    #[test]
    fn snapshot_round_trip_preserves_state() {
        let fleet = ScooterFleet::new();
        fleet
            .apply(&Command::Create { id: "s4".to_string() })
            .unwrap();
        fleet
            .apply(&Command::Reserve {
                id: "s4".to_string(),
                reservation_id: "r1".to_string(),
            })
            .unwrap();
        fleet
            .apply(&Command::Release {
                id: "s4".to_string(),
                distance: 42,
            })
            .unwrap();
        let bytes = fleet.snapshot();

        let fresh = ScooterFleet::new();
        fresh.load(&bytes).unwrap();
        assert_eq!(fresh.get("s4"), fleet.get("s4"));
    }

    #[test]
    fn total_distance_never_regresses_across_reads() {
        let fleet = ScooterFleet::new();
        fleet
            .apply(&Command::Create { id: "s5".to_string() })
            .unwrap();
        let mut last = 0u64;
        for i in 1..=5u64 {
            fleet
                .apply(&Command::Reserve {
                    id: "s5".to_string(),
                    reservation_id: format!("r{i}"),
                })
                .unwrap();
            fleet
                .apply(&Command::Release {
                    id: "s5".to_string(),
                    distance: i,
                })
                .unwrap();
            let now = fleet.get("s5").unwrap().total_distance;
            assert!(now >= last);
            last = now;
        }
    }
}
