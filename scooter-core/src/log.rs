//! The replicated log.  Entries are keyed by slot, never by insertion order: the canonical defect
//! this design note calls out is storing a log entry at a position derived from append count while
//! looking it up by slot later. A mutex plus two condvars give the applier and any HTTP handler
//! blocked on read-your-writes a way to wait without polling.

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use scooter_wire::{Command, Error, LogValue, Round, Slot};

struct Inner {
    first_slot: Slot,
    chosen: BTreeMap<Slot, Command>,
    last_applied: Option<Slot>,
}

/// The slot-keyed, chosen/applied view of the log.  Per-slot promise/accept state lives in
/// [crate::acceptor::Acceptor] instead -- this type only knows about values that have already won
/// a quorum.
pub struct ReplicatedLog {
    inner: Mutex<Inner>,
    chosen_cv: Condvar,
    applied_cv: Condvar,
}

impl Default for ReplicatedLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicatedLog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                first_slot: 0,
                chosen: BTreeMap::new(),
                last_applied: None,
            }),
            chosen_cv: Condvar::new(),
            applied_cv: Condvar::new(),
        }
    }

    pub fn first_slot(&self) -> Slot {
        self.inner.lock().expect("log lock poisoned").first_slot
    }

    pub fn applied_index(&self) -> Option<Slot> {
        self.inner.lock().expect("log lock poisoned").last_applied
    }

    /// Highest slot for which a chosen value is known, if any.
    pub fn chosen_index(&self) -> Option<Slot> {
        self.inner
            .lock()
            .expect("log lock poisoned")
            .chosen
            .keys()
            .next_back()
            .copied()
    }

    /// Record that `slot` was chosen with `command`.  Idempotent: repeated delivery of the same
    /// (slot, command) pair is a no-op after the first.  A mismatched re-delivery is a safety
    /// violation in the protocol above this log, not a recoverable condition here.
    pub fn mark_chosen(&self, slot: Slot, command: Command) -> Result<(), Error> {
        let mut inner = self.inner.lock().expect("log lock poisoned");
        if slot < inner.first_slot {
            return Ok(()); // covered by a snapshot already; safe to ignore
        }
        match inner.chosen.get(&slot) {
            Some(existing) => {
                assert_eq!(
                    existing, &command,
                    "agreement violated: slot {slot} chosen with two different values"
                );
            }
            None => {
                inner.chosen.insert(slot, command);
            }
        }
        drop(inner);
        self.chosen_cv.notify_all();
        Ok(())
    }

    /// Block the calling (applier) thread until the slot immediately after the last applied one
    /// is chosen, then return it without marking it applied -- the caller applies it and calls
    /// [Self::mark_applied].
    pub fn wait_for_next_chosen(&self, timeout: Duration) -> Option<(Slot, Command)> {
        let mut inner = self.inner.lock().expect("log lock poisoned");
        let deadline = Instant::now() + timeout;
        loop {
            let next = inner.last_applied.map(|s| s + 1).unwrap_or(inner.first_slot);
            if let Some(cmd) = inner.chosen.get(&next) {
                return Some((next, cmd.clone()));
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _timed_out) = self
                .chosen_cv
                .wait_timeout(inner, deadline - now)
                .expect("log lock poisoned");
            inner = guard;
        }
    }

    pub fn mark_applied(&self, slot: Slot) {
        let mut inner = self.inner.lock().expect("log lock poisoned");
        debug_assert!(inner.last_applied.map(|s| slot == s + 1).unwrap_or(slot == inner.first_slot));
        inner.last_applied = Some(slot);
        drop(inner);
        self.applied_cv.notify_all();
    }

    /// Block until `slot` has been applied locally, or the timeout elapses.  Used by HTTP
    /// handlers so a write response only returns after read-your-writes holds.
    pub fn wait_until_applied(&self, slot: Slot, timeout: Duration) -> bool {
        let mut inner = self.inner.lock().expect("log lock poisoned");
        if slot < inner.first_slot {
            return true; // covered by an installed snapshot, strictly in the past
        }
        let deadline = Instant::now() + timeout;
        loop {
            if inner.last_applied.map(|a| a >= slot).unwrap_or(false) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timed_out) = self
                .applied_cv
                .wait_timeout(inner, deadline - now)
                .expect("log lock poisoned");
            inner = guard;
        }
    }

    /// Fetch chosen entries in `[lo, hi]` for a peer catching up.
    pub fn fetch_range(&self, lo: Slot, hi: Slot) -> Result<Vec<LogValue>, Error> {
        let inner = self.inner.lock().expect("log lock poisoned");
        if lo < inner.first_slot {
            return Err(Error::below_snapshot(lo, inner.first_slot));
        }
        Ok(inner
            .chosen
            .range(lo..=hi)
            .map(|(slot, command)| LogValue {
                slot: *slot,
                round: Round::BOTTOM,
                command: command.clone(),
            })
            .collect())
    }

    /// Drop all entries below `new_first_slot`; called after a snapshot is taken or installed.
    pub fn truncate_below(&self, new_first_slot: Slot) {
        let mut inner = self.inner.lock().expect("log lock poisoned");
        inner.chosen = inner.chosen.split_off(&new_first_slot);
        if new_first_slot > inner.first_slot {
            inner.first_slot = new_first_slot;
        }
    }

    /// Used only by snapshot installation: fast-forward the applied/chosen watermark to
    /// `last_included_slot` without re-running Apply, then truncate below it. The state machine
    /// itself was already replaced by `SnapshotEngine::install`.
    pub fn fast_forward(&self, last_included_slot: Slot) {
        let mut inner = self.inner.lock().expect("log lock poisoned");
        if inner.last_applied.map(|a| a < last_included_slot).unwrap_or(true) {
            inner.last_applied = Some(last_included_slot);
        }
        inner.chosen = inner.chosen.split_off(&(last_included_slot + 1));
        if last_included_slot + 1 > inner.first_slot {
            inner.first_slot = last_included_slot + 1;
        }
        drop(inner);
        self.applied_cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_chosen_then_wait_for_next() {
        let log = ReplicatedLog::new();
        log.mark_chosen(0, Command::Create { id: "a".to_string() }).unwrap();
        let (slot, cmd) = log.wait_for_next_chosen(Duration::from_millis(50)).unwrap();
        assert_eq!(slot, 0);
        assert_eq!(cmd, Command::Create { id: "a".to_string() });
    }

    #[test]
    fn applier_blocks_until_contiguous() {
        let log = ReplicatedLog::new();
        log.mark_chosen(1, Command::Create { id: "b".to_string() }).unwrap();
        assert!(log.wait_for_next_chosen(Duration::from_millis(20)).is_none());
        log.mark_chosen(0, Command::Create { id: "a".to_string() }).unwrap();
        let (slot, _) = log.wait_for_next_chosen(Duration::from_millis(50)).unwrap();
        assert_eq!(slot, 0);
    }

    #[test]
    fn read_your_writes_unblocks_on_apply() {
        let log = ReplicatedLog::new();
        log.mark_chosen(0, Command::Create { id: "a".to_string() }).unwrap();
        assert!(!log.wait_until_applied(0, Duration::from_millis(10)));
        log.mark_applied(0);
        assert!(log.wait_until_applied(0, Duration::from_millis(10)));
    }

    #[test]
    fn truncate_then_fetch_below_first_slot_fails() {
        let log = ReplicatedLog::new();
        for s in 0..5 {
            log.mark_chosen(s, Command::Nop).unwrap();
        }
        log.truncate_below(3);
        assert_eq!(log.first_slot(), 3);
        assert!(log.fetch_range(0, 4).is_err());
        assert!(log.fetch_range(3, 4).is_ok());
    }
}
