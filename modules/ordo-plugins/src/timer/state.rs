//! Active timers, stored as parallel arrays indexed by slot.
//!
//! A timer's id is the event sequence of its `TimerStarted` event. Event
//! sequences are unique store-wide, so ids never collide and no separate id
//! generator exists. The table only changes when timer events are applied.

use std::collections::HashMap;

/// One active timer. `period` is 0 for one-shot timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEntry {
    pub timer_type: i32,
    pub id: i64,
    pub timeout: i64,
    pub period: i64,
}

/// Slot-ordered timer table with an id → slot index.
///
/// Lookup by id is O(1). Removal compacts the arrays and is O(n); timer counts
/// are bounded by the business scenario, not by message volume.
#[derive(Debug, Default)]
pub struct TimerState {
    types: Vec<i32>,
    ids: Vec<i64>,
    timeouts: Vec<i64>,
    periods: Vec<i64>,
    slots: HashMap<i64, usize>,
    last_id: i64,
}

impl TimerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a one-shot timer. `false` if `id` is already present.
    pub(crate) fn add(&mut self, timer_type: i32, id: i64, timeout: i64) -> bool {
        self.add_periodic(timer_type, id, timeout, 0)
    }

    /// Add a timer that re-arms every `period` millis after firing.
    pub(crate) fn add_periodic(&mut self, timer_type: i32, id: i64, timeout: i64, period: i64) -> bool {
        if self.slots.contains_key(&id) {
            return false;
        }
        self.slots.insert(id, self.ids.len());
        self.types.push(timer_type);
        self.ids.push(id);
        self.timeouts.push(timeout);
        self.periods.push(period.max(0));
        self.last_id = self.last_id.max(id);
        true
    }

    /// `false` if no timer has `id`.
    pub(crate) fn remove(&mut self, id: i64) -> bool {
        match self.slots.get(&id) {
            Some(&slot) => {
                self.remove_by_index(slot);
                true
            }
            None => false,
        }
    }

    /// Remove the timer in `slot`, shifting later slots down by one.
    pub(crate) fn remove_by_index(&mut self, slot: usize) -> Option<TimerEntry> {
        if slot >= self.ids.len() {
            return None;
        }
        let entry = self.entry(slot);
        self.types.remove(slot);
        self.ids.remove(slot);
        self.timeouts.remove(slot);
        self.periods.remove(slot);
        self.slots.remove(&entry.id);
        for (shifted, id) in self.ids.iter().enumerate().skip(slot) {
            self.slots.insert(*id, shifted);
        }
        Some(entry)
    }

    /// Slot of `id`, or `-1` when absent.
    pub fn index_by_id(&self, id: i64) -> i32 {
        self.slots
            .get(&id)
            .and_then(|slot| i32::try_from(*slot).ok())
            .unwrap_or(-1)
    }

    pub fn get(&self, id: i64) -> Option<TimerEntry> {
        self.slots.get(&id).map(|slot| self.entry(*slot))
    }

    /// Move the deadline of an existing timer. `false` if absent.
    pub(crate) fn reschedule(&mut self, id: i64, timeout: i64) -> bool {
        match self.slots.get(&id) {
            Some(&slot) => {
                self.timeouts[slot] = timeout;
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn timer_type(&self, slot: usize) -> Option<i32> {
        self.types.get(slot).copied()
    }

    pub fn timer_id(&self, slot: usize) -> Option<i64> {
        self.ids.get(slot).copied()
    }

    pub fn timeout(&self, slot: usize) -> Option<i64> {
        self.timeouts.get(slot).copied()
    }

    /// Highest timer id ever added; 0 before the first timer.
    pub fn last_timer_id(&self) -> i64 {
        self.last_id
    }

    pub fn iter(&self) -> impl Iterator<Item = TimerEntry> + '_ {
        (0..self.ids.len()).map(|slot| self.entry(slot))
    }

    /// Timer with the earliest deadline; the lowest slot wins ties.
    pub fn next_expiring(&self) -> Option<TimerEntry> {
        self.iter().min_by_key(|entry| entry.timeout)
    }

    /// Timers whose deadline is at or before `now`, in slot order.
    pub fn expired(&self, now: i64) -> impl Iterator<Item = TimerEntry> + '_ {
        self.iter().filter(move |entry| entry.timeout <= now)
    }

    fn entry(&self, slot: usize) -> TimerEntry {
        TimerEntry {
            timer_type: self.types[slot],
            id: self.ids[slot],
            timeout: self.timeouts[slot],
            period: self.periods[slot],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removal_keeps_the_index_consistent() {
        let mut timers = TimerState::new();
        for id in [10, 20, 30, 40] {
            assert!(timers.add(1, id, id * 100));
        }

        assert!(timers.remove(20));
        assert_eq!(timers.index_by_id(10), 0);
        assert_eq!(timers.index_by_id(30), 1);
        assert_eq!(timers.index_by_id(40), 2);
        assert_eq!(timers.timer_id(1), Some(30));
        assert_eq!(timers.timeout(2), Some(4_000));
    }

    #[test]
    fn last_timer_id_is_the_highest_id_added() {
        let mut timers = TimerState::new();
        assert_eq!(timers.last_timer_id(), 0);
        timers.add(1, 500, 0);
        timers.add(1, 7, 0);
        assert_eq!(timers.last_timer_id(), 500);
        timers.remove(500);
        assert_eq!(timers.last_timer_id(), 500);
    }

    #[test]
    fn add_and_remove_track_count() {
        let mut timers = TimerState::new();

        assert!(timers.add(3, 42, 1_000));
        assert_eq!(timers.count(), 1);
        assert!(!timers.add(3, 42, 2_000), "duplicate id must be rejected");
        assert_eq!(timers.count(), 1);

        assert!(timers.remove(42));
        assert_eq!(timers.count(), 0);
        assert_eq!(timers.index_by_id(42), -1);
        assert!(!timers.remove(42));
    }

    #[test]
    fn removing_the_first_slot_shifts_the_rest() {
        let mut timers = TimerState::new();
        timers.add(1, 10, 100);
        timers.add(2, 20, 200);
        timers.add(3, 30, 300);

        assert_eq!(timers.remove_by_index(0).map(|t| t.id), Some(10));
        assert_eq!(timers.remove_by_index(5), None);
        assert_eq!(timers.index_by_id(20), 0);
        assert_eq!(timers.index_by_id(30), 1);
        assert_eq!(timers.get(30).map(|t| t.timer_type), Some(3));
    }

    #[test]
    fn next_expiring_picks_the_earliest_deadline() {
        let mut timers = TimerState::new();
        timers.add(1, 1, 300);
        timers.add(2, 2, 100);
        timers.add(3, 3, 100);
        assert_eq!(timers.next_expiring().map(|t| t.id), Some(2));
        assert_eq!(timers.expired(150).map(|t| t.id).collect::<Vec<_>>(), vec![2, 3]);
    }
}
