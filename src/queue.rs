use chrono::{DateTime, Utc};

use std::collections::HashMap;

use crate::entry::{FireAction, TimerId};

/// A timer entry stored in the queue's arena.
struct Slot {
    deadline: DateTime<Utc>,
    /// Position in `heap` while the entry is pending.
    pos: Option<usize>,
    /// The owning handle was dropped; release the slot once it stops being pending.
    detached: bool,
    action: FireAction,
}

/// Pending timer entries ordered by deadline.
///
/// Entries live in an id-keyed arena so handles can refer to them after they
/// fired or were stopped. The heap holds the ids of pending entries only and is
/// keyed on `(deadline, id)`: since ids are handed out in creation order, entries
/// with equal deadlines fire in the order they were created.
#[derive(Default)]
pub(crate) struct TimerQueue {
    slots: HashMap<TimerId, Slot>,
    heap: Vec<TimerId>,
    next_id: u64,
}

impl TimerQueue {
    /// Allocate an entry without queueing it.
    pub fn register(&mut self, deadline: DateTime<Utc>, action: FireAction) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.slots.insert(
            id,
            Slot {
                deadline,
                pos: None,
                detached: false,
                action,
            },
        );
        id
    }

    /// Queue an entry at its current deadline. No-op if already pending.
    pub fn start(&mut self, id: TimerId) {
        let Some(slot) = self.slots.get_mut(&id) else {
            return;
        };
        if slot.pos.is_some() {
            return;
        }
        let pos = self.heap.len();
        slot.pos = Some(pos);
        self.heap.push(id);
        self.sift_up(pos);
    }

    /// Unqueue an entry. Returns whether it was pending.
    pub fn stop(&mut self, id: TimerId) -> bool {
        match self.slots.get(&id).and_then(|slot| slot.pos) {
            Some(pos) => {
                self.remove_at(pos);
                true
            }
            None => false,
        }
    }

    /// Move an entry to a new deadline, queueing it if it was not pending.
    pub fn reset(&mut self, id: TimerId, deadline: DateTime<Utc>) {
        let Some(slot) = self.slots.get_mut(&id) else {
            return;
        };
        slot.deadline = deadline;
        let pos = slot.pos;
        match pos {
            Some(pos) => {
                let pos = self.sift_up(pos);
                self.sift_down(pos);
            }
            None => self.start(id),
        }
    }

    /// The pending entry with the earliest deadline.
    pub fn next(&self) -> Option<(TimerId, DateTime<Utc>)> {
        let id = *self.heap.first()?;
        self.slots.get(&id).map(|slot| (id, slot.deadline))
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.slots.get(&id).is_some_and(|slot| slot.pos.is_some())
    }

    pub fn action(&self, id: TimerId) -> Option<&FireAction> {
        self.slots.get(&id).map(|slot| &slot.action)
    }

    /// Drop an entry whose handle went away.
    ///
    /// Pending callbacks stay queued and are released after they fire;
    /// everything else is unqueued and freed immediately. Returns the action of
    /// a freed entry.
    pub fn release(&mut self, id: TimerId) -> Option<FireAction> {
        let slot = self.slots.get_mut(&id)?;
        if slot.pos.is_some() && slot.action.is_callback() {
            slot.detached = true;
            return None;
        }
        self.stop(id);
        self.slots.remove(&id).map(|slot| slot.action)
    }

    /// Free the slot of a detached entry that is no longer pending.
    pub fn collect(&mut self, id: TimerId) -> Option<FireAction> {
        if self
            .slots
            .get(&id)
            .is_some_and(|slot| slot.detached && slot.pos.is_none())
        {
            return self.slots.remove(&id).map(|slot| slot.action);
        }
        None
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Unqueue every pending entry. Returns the actions of freed detached entries.
    pub fn clear(&mut self) -> Vec<FireAction> {
        for id in self.heap.drain(..) {
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.pos = None;
            }
        }
        let detached: Vec<_> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.detached)
            .map(|(id, _)| *id)
            .collect();
        detached
            .into_iter()
            .filter_map(|id| self.slots.remove(&id))
            .map(|slot| slot.action)
            .collect()
    }

    fn key(&self, pos: usize) -> (DateTime<Utc>, TimerId) {
        let id = self.heap[pos];
        (self.slots[&id].deadline, id)
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        for pos in [a, b] {
            let id = self.heap[pos];
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.pos = Some(pos);
            }
        }
    }

    fn sift_up(&mut self, mut pos: usize) -> usize {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.key(pos) >= self.key(parent) {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
        pos
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;
            if left < len && self.key(left) < self.key(smallest) {
                smallest = left;
            }
            if right < len && self.key(right) < self.key(smallest) {
                smallest = right;
            }
            if smallest == pos {
                return;
            }
            self.swap(pos, smallest);
            pos = smallest;
        }
    }

    fn remove_at(&mut self, pos: usize) {
        let last = self.heap.len() - 1;
        self.swap(pos, last);
        if let Some(id) = self.heap.pop() {
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.pos = None;
            }
        }
        if pos < self.heap.len() {
            let pos = self.sift_up(pos);
            self.sift_down(pos);
        }
    }
}
