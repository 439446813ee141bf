//! Replay progress: which command batches have been fully applied.

use std::collections::BTreeMap;

use crate::sequence::NIL_SEQUENCE;

/// Per source, the highest source sequence whose whole batch has been applied.
///
/// Values only move forward. Used to skip batches (and commands) that were
/// already applied when a log is read again from the start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayProgress {
    applied: BTreeMap<i32, i64>,
    last_event_sequence: i64,
    last_applied_event_sequence: i64,
}

impl ReplayProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest fully applied sequence of `source_id`, or [`NIL_SEQUENCE`].
    pub fn applied_sequence(&self, source_id: i32) -> i64 {
        self.applied.get(&source_id).copied().unwrap_or(NIL_SEQUENCE)
    }

    pub fn is_applied(&self, source_id: i32, source_sequence: i64) -> bool {
        source_sequence <= self.applied_sequence(source_id)
    }

    /// Record a closed batch. Ignored if `source_sequence` is not newer.
    pub fn mark_applied(&mut self, source_id: i32, source_sequence: i64, event_sequence: i64) {
        let applied = self.applied.entry(source_id).or_insert(NIL_SEQUENCE);
        if source_sequence > *applied {
            *applied = source_sequence;
        }
        self.last_applied_event_sequence = self.last_applied_event_sequence.max(event_sequence);
    }

    /// Note an event sequence seen in the store, applied or not.
    pub fn observe_event_sequence(&mut self, event_sequence: i64) {
        self.last_event_sequence = self.last_event_sequence.max(event_sequence);
    }

    /// Highest event sequence seen in the event store.
    pub fn last_event_sequence(&self) -> i64 {
        self.last_event_sequence
    }

    /// Event sequence of the most recent terminal event applied.
    pub fn last_applied_event_sequence(&self) -> i64 {
        self.last_applied_event_sequence
    }

    /// `(source_id, applied_sequence)` in source id order.
    pub fn sources(&self) -> impl Iterator<Item = (i32, i64)> + '_ {
        self.applied.iter().map(|(source, sequence)| (*source, *sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applied_sequence_is_monotonic_per_source() {
        let mut progress = ReplayProgress::new();
        progress.mark_applied(1, 5, 10);
        progress.mark_applied(1, 3, 11);
        progress.mark_applied(2, 1, 12);

        assert_eq!(progress.applied_sequence(1), 5);
        assert!(progress.is_applied(1, 4));
        assert!(!progress.is_applied(1, 6));
        assert_eq!(progress.applied_sequence(3), NIL_SEQUENCE);
        assert_eq!(progress.sources().collect::<Vec<_>>(), vec![(1, 5), (2, 1)]);
        assert_eq!(progress.last_applied_event_sequence(), 12);
    }
}
