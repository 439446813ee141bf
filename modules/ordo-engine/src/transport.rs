//! Boundary to the outside world. Transports carry command bytes in and
//! published event bytes out; the engine treats them as black boxes.

use std::sync::Arc;

use anyhow::Result;
use ordo_store::{Appender, InMemoryStore, MessageStore, PollResult, Poller, StoreMode, StoreResult};
use tracing::debug;

use crate::frame::Event;
use crate::traits::{Input, Received, Receiver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Sent,
    Backpressure,
}

pub trait MessageSender: Send {
    fn send(&mut self, message: &[u8]) -> Result<SendResult>;
}

pub trait MessageReceiver: Send {
    /// Hand pending messages to `handler` without blocking. Returns how many
    /// were consumed; a [`PollResult::Peek`] leaves the message for next time.
    fn receive(&mut self, handler: &mut dyn FnMut(&[u8]) -> PollResult) -> Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Published {
    Accepted,
    Backpressure,
}

/// Sink for committed events. Sees the log in store order, markers included,
/// and only once the batch an event belongs to has been applied locally.
pub trait Output: Send {
    fn publish(&mut self, event: &Event<'_>) -> Published;
}

// ---------------------------------------------------------------------------
// TransportInput
// ---------------------------------------------------------------------------

/// Encode a command message for [`TransportInput`]: `payload_type` (i32 LE)
/// followed by the payload.
pub fn encode_transport_command(payload_type: i32, payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(4 + payload.len());
    message.extend_from_slice(&payload_type.to_le_bytes());
    message.extend_from_slice(payload);
    message
}

/// Adapts a [`MessageReceiver`] into an [`Input`]. Every message becomes a
/// command of one source with an automatically assigned sequence.
pub struct TransportInput<R> {
    source_id: i32,
    receiver: R,
    max_per_poll: usize,
}

impl<R: MessageReceiver> TransportInput<R> {
    pub fn new(source_id: i32, receiver: R) -> Self {
        Self {
            source_id,
            receiver,
            max_per_poll: 64,
        }
    }

    pub fn with_max_per_poll(mut self, max_per_poll: usize) -> Self {
        self.max_per_poll = max_per_poll.max(1);
        self
    }
}

impl<R: MessageReceiver> Input for TransportInput<R> {
    fn poll(&mut self, sequencer: &mut dyn Receiver) -> Result<usize> {
        let source_id = self.source_id;
        let mut remaining = self.max_per_poll;
        let mut fault = None;

        let offered = self.receiver.receive(&mut |message| {
            if remaining == 0 {
                return PollResult::Peek;
            }
            if message.len() < 4 {
                debug!(source_id, len = message.len(), "Dropping runt transport message");
                return PollResult::Poll;
            }
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&message[..4]);
            let payload_type = i32::from_le_bytes(raw);

            match sequencer.receive(source_id, None, payload_type, &message[4..]) {
                Ok(Received::Backpressure) => PollResult::Peek,
                Ok(_) => {
                    remaining -= 1;
                    PollResult::Poll
                }
                Err(e) => {
                    fault = Some(e);
                    PollResult::Peek
                }
            }
        })?;

        match fault {
            Some(e) => Err(e.into()),
            None => Ok(offered),
        }
    }
}

// ---------------------------------------------------------------------------
// In-process queue transport
// ---------------------------------------------------------------------------

/// In-process transport over a remove-on-poll [`InMemoryStore`]. Useful for
/// wiring tests and for feeding one engine from another thread.
pub struct QueueTransport {
    store: Arc<InMemoryStore>,
}

impl QueueTransport {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new(StoreMode::RemoveOnPoll)),
        }
    }

    pub fn bounded(capacity: usize) -> StoreResult<Self> {
        Ok(Self {
            store: Arc::new(InMemoryStore::bounded(StoreMode::RemoveOnPoll, capacity)?),
        })
    }

    pub fn sender(&self) -> QueueSender {
        QueueSender {
            appender: self.store.appender(),
        }
    }

    /// Only one receiver should be taken: messages are removed on poll.
    pub fn receiver(&self) -> QueueReceiver {
        QueueReceiver {
            poller: self.store.poller(),
        }
    }

    pub fn pending(&self) -> usize {
        self.store.size()
    }
}

impl Default for QueueTransport {
    fn default() -> Self {
        Self::new()
    }
}

pub struct QueueSender {
    appender: Box<dyn Appender>,
}

impl MessageSender for QueueSender {
    fn send(&mut self, message: &[u8]) -> Result<SendResult> {
        match self.appender.append(message) {
            Ok(()) => Ok(SendResult::Sent),
            Err(e) if e.is_backpressure() => Ok(SendResult::Backpressure),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct QueueReceiver {
    poller: Box<dyn Poller>,
}

impl MessageReceiver for QueueReceiver {
    fn receive(&mut self, handler: &mut dyn FnMut(&[u8]) -> PollResult) -> Result<usize> {
        Ok(self.poller.poll_batch(usize::MAX, handler)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorded(Vec<(i32, Option<i64>, i32, Vec<u8>)>);

    impl Receiver for Recorded {
        fn receive(
            &mut self,
            source_id: i32,
            source_sequence: Option<i64>,
            payload_type: i32,
            payload: &[u8],
        ) -> Result<Received, ordo_store::StoreError> {
            self.0
                .push((source_id, source_sequence, payload_type, payload.to_vec()));
            Ok(Received::Accepted(self.0.len() as i64))
        }
    }

    #[test]
    fn transport_input_decodes_payload_type_and_payload() {
        let queue = QueueTransport::new();
        let mut sender = queue.sender();
        sender.send(&encode_transport_command(7, b"deposit")).unwrap();
        sender.send(&[1, 2]).unwrap();
        sender.send(&encode_transport_command(-3, b"")).unwrap();

        let mut input = TransportInput::new(11, queue.receiver());
        let mut recorded = Recorded::default();
        assert_eq!(input.poll(&mut recorded).unwrap(), 3);

        assert_eq!(
            recorded.0,
            vec![
                (11, None, 7, b"deposit".to_vec()),
                (11, None, -3, Vec::new()),
            ]
        );
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn bounded_queue_reports_backpressure() {
        let queue = QueueTransport::bounded(1).unwrap();
        let mut sender = queue.sender();
        assert_eq!(sender.send(b"abcd").unwrap(), SendResult::Sent);
        assert_eq!(sender.send(b"efgh").unwrap(), SendResult::Backpressure);
    }
}
