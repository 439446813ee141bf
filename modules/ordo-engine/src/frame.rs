//! Binary framing for commands and events.
//!
//! Fixed little-endian header followed by an opaque payload. [`Command`] and
//! [`Event`] are bounds-checked views over a store's bytes, valid for one poll
//! callback. Copy what you need to keep.
//!
//! Command header (28 bytes):
//!
//! | offset | field            | type |
//! |--------|------------------|------|
//! | 0      | source_id        | i32  |
//! | 4      | source_sequence  | i64  |
//! | 12     | command_time     | i64  |
//! | 20     | payload_type     | i32  |
//! | 24     | payload_length   | i32  |
//!
//! Event header (44 bytes):
//!
//! | offset | field            | type |
//! |--------|------------------|------|
//! | 0      | source_id        | i32  |
//! | 4      | source_sequence  | i64  |
//! | 12     | event_sequence   | i64  |
//! | 20     | event_index      | i32  |
//! | 24     | event_time       | i64  |
//! | 32     | event_type       | i32  |
//! | 36     | payload_type     | i32  |
//! | 40     | payload_length   | i32  |

use std::fmt;

use ordo_store::StoreError;
use thiserror::Error;

pub const COMMAND_HEADER_LEN: usize = 28;
pub const EVENT_HEADER_LEN: usize = 44;

/// Payload type carried by marker events that have no payload of their own.
pub const MARKER_PAYLOAD_TYPE: i32 = i32::MIN;

/// Negative payload types belong to the engine and its plugins.
pub fn is_system_type(payload_type: i32) -> bool {
    payload_type < 0
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame of {len} bytes is shorter than its {header} byte header")]
    TooShort { len: usize, header: usize },

    #[error("declared payload length {declared} does not match {available} bytes")]
    PayloadLength { declared: i32, available: usize },

    #[error(transparent)]
    PayloadTooLarge(#[from] PayloadTooLarge),

    #[error("unknown event type code {0}")]
    UnknownEventType(i32),
}

/// The only way encoding can fail.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("payload of {0} bytes does not fit the frame length field")]
pub struct PayloadTooLarge(pub usize);

/// Largest payload the frame length field can describe.
pub const MAX_PAYLOAD_LEN: usize = i32::MAX as usize;

impl From<PayloadTooLarge> for StoreError {
    fn from(PayloadTooLarge(got_bytes): PayloadTooLarge) -> Self {
        StoreError::MessageTooLarge {
            max_bytes: MAX_PAYLOAD_LEN,
            got_bytes,
        }
    }
}

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// Position of an event within its batch, plus the two marker kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Any event of a batch except the last.
    Normal,
    /// Last event of a batch.
    Commit,
    /// Marker closing a batch that produced no events.
    AutoCommit,
    /// Marker closing a batch whose earlier events must be discarded.
    Rollback,
}

impl EventType {
    pub fn code(self) -> i32 {
        match self {
            EventType::Normal => 0,
            EventType::Commit => 1,
            EventType::AutoCommit => 2,
            EventType::Rollback => 3,
        }
    }

    pub fn from_code(code: i32) -> Result<Self, FrameError> {
        match code {
            0 => Ok(EventType::Normal),
            1 => Ok(EventType::Commit),
            2 => Ok(EventType::AutoCommit),
            3 => Ok(EventType::Rollback),
            other => Err(FrameError::UnknownEventType(other)),
        }
    }

    /// Closes its batch.
    pub fn is_terminal(self) -> bool {
        !matches!(self, EventType::Normal)
    }

    /// Carries no business payload.
    pub fn is_marker(self) -> bool {
        matches!(self, EventType::AutoCommit | EventType::Rollback)
    }
}

// ---------------------------------------------------------------------------
// Headers (owned, plain values)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub source_id: i32,
    pub source_sequence: i64,
    pub command_time: i64,
    pub payload_type: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    pub source_id: i32,
    pub source_sequence: i64,
    pub event_sequence: i64,
    pub event_index: i32,
    pub event_time: i64,
    pub event_type: EventType,
    pub payload_type: i32,
}

/// Append an encoded command to `buf`. Returns the number of bytes written.
pub fn encode_command(
    buf: &mut Vec<u8>,
    header: &CommandHeader,
    payload: &[u8],
) -> Result<usize, PayloadTooLarge> {
    let length = payload_length(payload)?;
    let start = buf.len();
    buf.reserve(COMMAND_HEADER_LEN + payload.len());
    buf.extend_from_slice(&header.source_id.to_le_bytes());
    buf.extend_from_slice(&header.source_sequence.to_le_bytes());
    buf.extend_from_slice(&header.command_time.to_le_bytes());
    buf.extend_from_slice(&header.payload_type.to_le_bytes());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf.len() - start)
}

/// Append an encoded event to `buf`. Returns the number of bytes written.
pub fn encode_event(
    buf: &mut Vec<u8>,
    header: &EventHeader,
    payload: &[u8],
) -> Result<usize, PayloadTooLarge> {
    let length = payload_length(payload)?;
    let start = buf.len();
    buf.reserve(EVENT_HEADER_LEN + payload.len());
    buf.extend_from_slice(&header.source_id.to_le_bytes());
    buf.extend_from_slice(&header.source_sequence.to_le_bytes());
    buf.extend_from_slice(&header.event_sequence.to_le_bytes());
    buf.extend_from_slice(&header.event_index.to_le_bytes());
    buf.extend_from_slice(&header.event_time.to_le_bytes());
    buf.extend_from_slice(&header.event_type.code().to_le_bytes());
    buf.extend_from_slice(&header.payload_type.to_le_bytes());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf.len() - start)
}

fn payload_length(payload: &[u8]) -> Result<i32, PayloadTooLarge> {
    i32::try_from(payload.len()).map_err(|_| PayloadTooLarge(payload.len()))
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Borrowed view of an encoded command.
#[derive(Clone, Copy)]
pub struct Command<'a> {
    bytes: &'a [u8],
}

impl<'a> Command<'a> {
    /// Validate the header and payload length of `bytes`.
    pub fn wrap(bytes: &'a [u8]) -> Result<Self, FrameError> {
        check_length(bytes, COMMAND_HEADER_LEN, 24)?;
        Ok(Self { bytes })
    }

    pub fn source_id(&self) -> i32 {
        read_i32(self.bytes, 0)
    }

    pub fn source_sequence(&self) -> i64 {
        read_i64(self.bytes, 4)
    }

    pub fn command_time(&self) -> i64 {
        read_i64(self.bytes, 12)
    }

    pub fn payload_type(&self) -> i32 {
        read_i32(self.bytes, 20)
    }

    pub fn is_system(&self) -> bool {
        is_system_type(self.payload_type())
    }

    pub fn is_application(&self) -> bool {
        !self.is_system()
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[COMMAND_HEADER_LEN..]
    }

    pub fn header(&self) -> CommandHeader {
        CommandHeader {
            source_id: self.source_id(),
            source_sequence: self.source_sequence(),
            command_time: self.command_time(),
            payload_type: self.payload_type(),
        }
    }

    /// The whole encoded frame.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

impl fmt::Debug for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("source_id", &self.source_id())
            .field("source_sequence", &self.source_sequence())
            .field("command_time", &self.command_time())
            .field("payload_type", &self.payload_type())
            .field("payload_len", &self.payload().len())
            .finish()
    }
}

/// Borrowed view of an encoded event.
#[derive(Clone, Copy)]
pub struct Event<'a> {
    bytes: &'a [u8],
    event_type: EventType,
}

impl<'a> Event<'a> {
    /// Validate the header, event type code and payload length of `bytes`.
    pub fn wrap(bytes: &'a [u8]) -> Result<Self, FrameError> {
        check_length(bytes, EVENT_HEADER_LEN, 40)?;
        let event_type = EventType::from_code(read_i32(bytes, 32))?;
        Ok(Self { bytes, event_type })
    }

    pub fn source_id(&self) -> i32 {
        read_i32(self.bytes, 0)
    }

    pub fn source_sequence(&self) -> i64 {
        read_i64(self.bytes, 4)
    }

    pub fn event_sequence(&self) -> i64 {
        read_i64(self.bytes, 12)
    }

    pub fn event_index(&self) -> i32 {
        read_i32(self.bytes, 20)
    }

    pub fn event_time(&self) -> i64 {
        read_i64(self.bytes, 24)
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn payload_type(&self) -> i32 {
        read_i32(self.bytes, 36)
    }

    pub fn is_system(&self) -> bool {
        is_system_type(self.payload_type())
    }

    pub fn is_application(&self) -> bool {
        !self.is_system()
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[EVENT_HEADER_LEN..]
    }

    pub fn header(&self) -> EventHeader {
        EventHeader {
            source_id: self.source_id(),
            source_sequence: self.source_sequence(),
            event_sequence: self.event_sequence(),
            event_index: self.event_index(),
            event_time: self.event_time(),
            event_type: self.event_type,
            payload_type: self.payload_type(),
        }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

impl fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("source_id", &self.source_id())
            .field("source_sequence", &self.source_sequence())
            .field("event_sequence", &self.event_sequence())
            .field("event_index", &self.event_index())
            .field("event_type", &self.event_type)
            .field("payload_type", &self.payload_type())
            .field("payload_len", &self.payload().len())
            .finish()
    }
}

fn check_length(bytes: &[u8], header: usize, length_at: usize) -> Result<(), FrameError> {
    if bytes.len() < header {
        return Err(FrameError::TooShort {
            len: bytes.len(),
            header,
        });
    }
    let declared = read_i32(bytes, length_at);
    let available = bytes.len() - header;
    if declared < 0 || declared as usize != available {
        return Err(FrameError::PayloadLength {
            declared,
            available,
        });
    }
    Ok(())
}

fn read_i32(bytes: &[u8], at: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    i32::from_le_bytes(raw)
}

fn read_i64(bytes: &[u8], at: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    i64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_payload_maps_to_message_too_large() {
        let err = StoreError::from(PayloadTooLarge(MAX_PAYLOAD_LEN + 1));
        assert!(matches!(
            err,
            StoreError::MessageTooLarge { max_bytes, got_bytes }
                if max_bytes == MAX_PAYLOAD_LEN && got_bytes == MAX_PAYLOAD_LEN + 1
        ));
    }

    fn sample_event(event_type: EventType) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_event(
            &mut buf,
            &EventHeader {
                source_id: 7,
                source_sequence: 42,
                event_sequence: 1001,
                event_index: 2,
                event_time: 1_700_000_000_000,
                event_type,
                payload_type: -5,
            },
            b"payload",
        )
        .unwrap();
        buf
    }

    #[test]
    fn event_view_reads_every_header_field() {
        let bytes = sample_event(EventType::Commit);
        let event = Event::wrap(&bytes).unwrap();

        assert_eq!(event.source_id(), 7);
        assert_eq!(event.source_sequence(), 42);
        assert_eq!(event.event_sequence(), 1001);
        assert_eq!(event.event_index(), 2);
        assert_eq!(event.event_time(), 1_700_000_000_000);
        assert_eq!(event.event_type(), EventType::Commit);
        assert!(event.is_system());
        assert_eq!(event.payload(), b"payload");
    }

    #[test]
    fn command_view_distinguishes_system_from_application() {
        let mut buf = Vec::new();
        let header = CommandHeader {
            source_id: 1,
            source_sequence: 3,
            command_time: 99,
            payload_type: 12,
        };
        let written = encode_command(&mut buf, &header, b"hi").unwrap();
        assert_eq!(written, COMMAND_HEADER_LEN + 2);

        let command = Command::wrap(&buf).unwrap();
        assert!(command.is_application());
        assert_eq!(command.header(), header);
        assert_eq!(command.payload(), b"hi");
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let bytes = sample_event(EventType::Normal);
        assert!(matches!(
            Event::wrap(&bytes[..10]),
            Err(FrameError::TooShort { len: 10, header: EVENT_HEADER_LEN })
        ));
        assert!(matches!(
            Event::wrap(&bytes[..bytes.len() - 1]),
            Err(FrameError::PayloadLength { declared: 7, available: 6 })
        ));
    }

    #[test]
    fn unknown_event_type_code_is_rejected() {
        let mut bytes = sample_event(EventType::Normal);
        bytes[32..36].copy_from_slice(&9i32.to_le_bytes());
        assert_eq!(Event::wrap(&bytes).unwrap_err(), FrameError::UnknownEventType(9));
    }
}
