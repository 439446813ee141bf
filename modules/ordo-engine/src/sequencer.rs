//! Stamps incoming commands and appends them to the command store.

use std::collections::BTreeMap;
use std::sync::Arc;

use ordo_store::{Appender, StoreError};
use tracing::debug;

use crate::frame::{encode_command, CommandHeader};
use crate::sequence::SequenceGenerator;
use crate::time::TimeSource;
use crate::traits::{Received, Receiver};

/// One sequence generator per source id, plus the command store appender.
pub struct Sequencer {
    appender: Box<dyn Appender>,
    time: Arc<dyn TimeSource>,
    sources: BTreeMap<i32, SequenceGenerator>,
}

impl Sequencer {
    pub fn new(appender: Box<dyn Appender>, time: Arc<dyn TimeSource>) -> Self {
        Self {
            appender,
            time,
            sources: BTreeMap::new(),
        }
    }

    /// Last sequence issued or accepted for `source_id`.
    pub fn sequence(&self, source_id: i32) -> Option<i64> {
        self.sources.get(&source_id).map(SequenceGenerator::sequence)
    }

    /// Fast-forward a source after replay. See [`SequenceGenerator::next_sequence_min`].
    pub fn catch_up(&mut self, source_id: i32, min_sequence: i64) -> bool {
        self.sources
            .entry(source_id)
            .or_default()
            .next_sequence_min(min_sequence)
    }

    fn append(
        &mut self,
        source_id: i32,
        source_sequence: i64,
        payload_type: i32,
        payload: &[u8],
    ) -> Result<(), StoreError> {
        let header = CommandHeader {
            source_id,
            source_sequence,
            command_time: self.time.current_time(),
            payload_type,
        };
        let mut context = self.appender.appending()?;
        let length = encode_command(context.buffer(), &header, payload)?;
        context.commit(length)
    }
}

impl Receiver for Sequencer {
    fn receive(
        &mut self,
        source_id: i32,
        source_sequence: Option<i64>,
        payload_type: i32,
        payload: &[u8],
    ) -> Result<Received, StoreError> {
        let current = self.sources.entry(source_id).or_default().sequence();
        let sequence = match source_sequence {
            Some(explicit) if explicit <= current => {
                debug!(source_id, explicit, current, "Dropping command with stale source sequence");
                return Ok(Received::Duplicate);
            }
            Some(explicit) => explicit,
            None => current + 1,
        };

        match self.append(source_id, sequence, payload_type, payload) {
            Ok(()) => {
                self.catch_up(source_id, sequence);
                Ok(Received::Accepted(sequence))
            }
            Err(e) if e.is_backpressure() => Ok(Received::Backpressure),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Command;
    use crate::time::ManualTimeSource;
    use ordo_store::{InMemoryStore, MessageStore, StoreMode};

    fn sequencer(store: &InMemoryStore) -> Sequencer {
        Sequencer::new(store.appender(), Arc::new(ManualTimeSource::new(1_000)))
    }

    #[test]
    fn auto_sequences_are_per_source() {
        let store = InMemoryStore::new(StoreMode::KeepOnPoll);
        let mut sequencer = sequencer(&store);

        assert_eq!(sequencer.receive(1, None, 5, b"a").unwrap(), Received::Accepted(1));
        assert_eq!(sequencer.receive(2, None, 5, b"b").unwrap(), Received::Accepted(1));
        assert_eq!(sequencer.receive(1, None, 5, b"c").unwrap(), Received::Accepted(2));

        let messages = store.messages();
        let last = Command::wrap(&messages[2]).unwrap();
        assert_eq!(last.source_id(), 1);
        assert_eq!(last.source_sequence(), 2);
        assert_eq!(last.command_time(), 1_000);
        assert_eq!(last.payload(), b"c");
    }

    #[test]
    fn explicit_sequences_must_advance() {
        let store = InMemoryStore::new(StoreMode::KeepOnPoll);
        let mut sequencer = sequencer(&store);

        assert_eq!(sequencer.receive(1, Some(10), 5, b"").unwrap(), Received::Accepted(10));
        assert_eq!(sequencer.receive(1, Some(10), 5, b"").unwrap(), Received::Duplicate);
        assert_eq!(sequencer.receive(1, Some(4), 5, b"").unwrap(), Received::Duplicate);
        assert_eq!(sequencer.receive(1, None, 5, b"").unwrap(), Received::Accepted(11));
        assert_eq!(store.size(), 2);
    }

    #[test]
    fn full_command_store_is_backpressure_and_does_not_consume_a_sequence() {
        let store = InMemoryStore::bounded(StoreMode::RemoveOnPoll, 1).unwrap();
        let mut sequencer = sequencer(&store);

        assert_eq!(sequencer.receive(1, None, 5, b"").unwrap(), Received::Accepted(1));
        assert_eq!(sequencer.receive(1, None, 5, b"").unwrap(), Received::Backpressure);
        assert_eq!(sequencer.sequence(1), Some(1));
    }
}
