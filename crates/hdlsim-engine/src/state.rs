//! Simulation state: slots, triggers, and the timeline.
//!
//! Signals map to dense slot indices in first-seen order; the index is baked
//! into compiled modules as an immediate, so it must never change for the
//! lifetime of the simulation. A slot is pending iff its staged `next`
//! differs from the committed `curr`, and exactly the pending slots are in
//! the pending set.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

use hdlsim_common::{Shape, SignalRef};
use hdlsim_compiler::SignalMap;
use tracing::trace;

/// Index of a process within the engine's process table.
pub type ProcessId = usize;

/// Condition under which a trigger wakes its process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Any committed change of the slot.
    AnyChange,
    /// A committed change whose new value equals the given level.
    Edge(u8),
}

/// Storage for one signal: the committed and staged values.
#[derive(Debug, Clone, Copy)]
pub struct Slot {
    /// Value visible to readers in the current settle step.
    pub curr: i64,
    /// Value staged by drivers, applied at commit.
    pub next: i64,
    /// Reset constant the slot returns to on `reset`.
    pub reset: i64,
    /// Shape of the signal occupying the slot.
    pub shape: Shape,
}

/// Scheduling class at one instant: settle waits run strictly after
/// interval-driven wakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Priority {
    Normal,
    Settle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TimelineEntry {
    deadline_ps: u64,
    priority: Priority,
    seq: u64,
    pid: ProcessId,
}

/// Result of a commit: committed values and the processes to wake.
#[derive(Debug, Default)]
pub struct CommitResult {
    /// `(slot index, new committed value)` in slot order.
    pub updates: Vec<(usize, i64)>,
    /// Processes whose trigger condition matched, deduplicated, in slot
    /// order of the change that woke them.
    pub woken: Vec<ProcessId>,
}

/// Slot table, trigger registry, and timeline of one simulation.
#[derive(Debug, Default)]
pub struct SimState {
    indices: HashMap<SignalRef, usize>,
    signals: Vec<SignalRef>,
    slots: Vec<Slot>,
    pending: BTreeSet<usize>,
    triggers: HashMap<usize, Vec<(ProcessId, Trigger)>>,
    timeline: BinaryHeap<Reverse<TimelineEntry>>,
    next_seq: u64,
    now_ps: u64,
}

impl SimState {
    /// Empty state.
    pub fn new() -> Self {
        SimState::default()
    }

    /// Slot index of `signal`, allocating one on first sight.
    pub fn get_signal(&mut self, signal: &SignalRef) -> usize {
        if let Some(&index) = self.indices.get(signal) {
            return index;
        }
        let index = self.slots.len();
        self.indices.insert(signal.clone(), index);
        self.signals.push(signal.clone());
        self.slots.push(Slot {
            curr: signal.reset(),
            next: signal.reset(),
            reset: signal.reset(),
            shape: signal.shape(),
        });
        index
    }

    /// Signal occupying `index`.
    pub fn signal_at(&self, index: usize) -> &SignalRef {
        &self.signals[index]
    }

    /// Slot at `index`.
    pub fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    /// Number of allocated slots.
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Current simulated time in picoseconds.
    pub fn now_ps(&self) -> u64 {
        self.now_ps
    }

    /// Stage `value` as a slot's `next`, maintaining the pending set.
    pub fn set_slot(&mut self, index: usize, value: i64) {
        let slot = &mut self.slots[index];
        slot.next = value;
        if slot.next != slot.curr {
            self.pending.insert(index);
        } else {
            self.pending.remove(&index);
        }
    }

    /// Whether any slot is pending.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Commit every pending slot and collect fired triggers.
    ///
    /// Any-change triggers fire on every committed change; edge triggers
    /// fire when the new committed value equals the edge level.
    pub fn commit(&mut self) -> CommitResult {
        let pending = std::mem::take(&mut self.pending);
        let mut result = CommitResult::default();
        let mut seen = HashSet::new();
        for index in pending {
            let slot = &mut self.slots[index];
            if slot.next == slot.curr {
                continue;
            }
            slot.curr = slot.next;
            let value = slot.curr;
            result.updates.push((index, value));
            if let Some(watchers) = self.triggers.get(&index) {
                for (pid, trigger) in watchers {
                    let fired = match trigger {
                        Trigger::AnyChange => true,
                        Trigger::Edge(level) => value == i64::from(*level),
                    };
                    if fired && seen.insert(*pid) {
                        result.woken.push(*pid);
                    }
                }
            }
        }
        if !result.updates.is_empty() {
            trace!(
                updates = result.updates.len(),
                woken = result.woken.len(),
                now_ps = self.now_ps,
                "commit"
            );
        }
        result
    }

    /// Subscribe `pid` to a slot condition.
    pub fn add_trigger(&mut self, pid: ProcessId, index: usize, trigger: Trigger) {
        self.triggers.entry(index).or_default().push((pid, trigger));
    }

    /// Drop every subscription of `pid` on `index`.
    pub fn remove_trigger(&mut self, pid: ProcessId, index: usize) {
        if let Some(watchers) = self.triggers.get_mut(&index) {
            watchers.retain(|(p, _)| *p != pid);
        }
    }

    /// Schedule `pid` on the timeline.
    ///
    /// `Some(delta)` wakes at `now + delta`; `None` wakes at `now` with
    /// settle priority, strictly after interval-driven wakes of the same
    /// instant.
    pub fn wait_interval(&mut self, pid: ProcessId, delta_ps: Option<u64>) {
        let (deadline_ps, priority) = match delta_ps {
            Some(delta) => (self.now_ps + delta, Priority::Normal),
            None => (self.now_ps, Priority::Settle),
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timeline.push(Reverse(TimelineEntry {
            deadline_ps,
            priority,
            seq,
            pid,
        }));
    }

    /// Advance time to the next timeline group and return its processes.
    ///
    /// One group is all entries sharing the minimal `(deadline, priority)`
    /// key, popped in FIFO order. Returns `None` when the timeline is empty.
    pub fn advance_time(&mut self) -> Option<Vec<ProcessId>> {
        let Reverse(first) = self.timeline.pop()?;
        self.now_ps = first.deadline_ps;
        let mut woken = vec![first.pid];
        while let Some(&Reverse(entry)) = self.timeline.peek() {
            if entry.deadline_ps != first.deadline_ps || entry.priority != first.priority {
                break;
            }
            let _ = self.timeline.pop();
            woken.push(entry.pid);
        }
        trace!(now_ps = self.now_ps, woken = woken.len(), "time advanced");
        Some(woken)
    }

    /// Whether `pid` has a timeline entry.
    pub fn scheduled(&self, pid: ProcessId) -> bool {
        self.timeline.iter().any(|Reverse(e)| e.pid == pid)
    }

    /// Whether the timeline holds any entry.
    pub fn has_timeline(&self) -> bool {
        !self.timeline.is_empty()
    }

    /// Reinitialize every slot to its reset value, clear the pending set and
    /// the timeline, and rewind time to zero. Triggers are retained.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.curr = slot.reset;
            slot.next = slot.reset;
        }
        self.pending.clear();
        self.timeline.clear();
        self.next_seq = 0;
        self.now_ps = 0;
    }
}

impl SignalMap for SimState {
    fn slot_index(&mut self, signal: &SignalRef) -> usize {
        self.get_signal(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdlsim_common::{unsigned, Signal};

    #[test]
    fn test_get_signal_allocates_once() {
        let mut state = SimState::new();
        let a = Signal::with_reset("a", unsigned(4), 3);
        let b = Signal::new("b", unsigned(4));
        assert_eq!(state.get_signal(&a), 0);
        assert_eq!(state.get_signal(&b), 1);
        assert_eq!(state.get_signal(&a), 0);
        assert_eq!(state.num_slots(), 2);
        assert_eq!(state.slot(0).curr, 3);
        assert_eq!(state.slot(0).next, 3);
    }

    #[test]
    fn test_pending_tracks_difference() {
        let mut state = SimState::new();
        let a = Signal::new("a", unsigned(4));
        let idx = state.get_signal(&a);

        state.set_slot(idx, 5);
        assert!(state.has_pending());
        state.set_slot(idx, 0);
        assert!(!state.has_pending());
    }

    #[test]
    fn test_commit_fires_triggers() {
        let mut state = SimState::new();
        let clk = Signal::new("clk", unsigned(1));
        let idx = state.get_signal(&clk);
        state.add_trigger(7, idx, Trigger::Edge(1));
        state.add_trigger(8, idx, Trigger::AnyChange);

        state.set_slot(idx, 1);
        let result = state.commit();
        assert_eq!(result.updates, vec![(idx, 1)]);
        assert_eq!(result.woken, vec![7, 8]);
        assert_eq!(state.slot(idx).curr, 1);

        // falling edge wakes only the any-change watcher
        state.set_slot(idx, 0);
        let result = state.commit();
        assert_eq!(result.woken, vec![8]);
    }

    #[test]
    fn test_commit_is_idempotent_when_clean() {
        let mut state = SimState::new();
        let a = Signal::new("a", unsigned(4));
        let idx = state.get_signal(&a);
        state.set_slot(idx, 5);
        let _ = state.commit();
        let result = state.commit();
        assert!(result.updates.is_empty());
        assert!(result.woken.is_empty());
    }

    #[test]
    fn test_timeline_order_and_fifo() {
        let mut state = SimState::new();
        state.wait_interval(1, Some(100));
        state.wait_interval(2, Some(50));
        state.wait_interval(3, Some(50));

        assert_eq!(state.advance_time(), Some(vec![2, 3]));
        assert_eq!(state.now_ps(), 50);
        assert_eq!(state.advance_time(), Some(vec![1]));
        assert_eq!(state.now_ps(), 100);
        assert_eq!(state.advance_time(), None);
    }

    #[test]
    fn test_settle_runs_after_same_instant_wakes() {
        let mut state = SimState::new();
        state.wait_interval(1, None); // settle
        state.wait_interval(2, Some(0)); // interval at the same instant

        assert_eq!(state.advance_time(), Some(vec![2]));
        assert_eq!(state.now_ps(), 0);
        assert_eq!(state.advance_time(), Some(vec![1]));
        assert_eq!(state.now_ps(), 0);
    }

    #[test]
    fn test_remove_trigger() {
        let mut state = SimState::new();
        let a = Signal::new("a", unsigned(1));
        let idx = state.get_signal(&a);
        state.add_trigger(1, idx, Trigger::AnyChange);
        state.remove_trigger(1, idx);

        state.set_slot(idx, 1);
        assert!(state.commit().woken.is_empty());
    }

    #[test]
    fn test_reset() {
        let mut state = SimState::new();
        let a = Signal::with_reset("a", unsigned(4), 2);
        let idx = state.get_signal(&a);
        state.set_slot(idx, 9);
        let _ = state.commit();
        state.wait_interval(0, Some(10));
        let _ = state.advance_time();

        state.reset();
        assert_eq!(state.slot(idx).curr, 2);
        assert_eq!(state.slot(idx).next, 2);
        assert_eq!(state.now_ps(), 0);
        assert!(!state.has_pending());
        assert!(!state.has_timeline());
    }
}
