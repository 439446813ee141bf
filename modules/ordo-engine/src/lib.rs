//! Deterministic command/event processing engine.
//!
//! Inputs offer commands; the sequencer stamps and appends them to the command
//! store. The processing loop takes one command at a time, hands it to a
//! [`CommandProcessor`] that emits events through the [`EventRouter`], and
//! applies the committed batch to state through [`EventApplier`]s. Replaying
//! the event store against a fresh state reproduces the same state.
//!
//! Plugins add system inputs, processors and appliers under reserved ranges of
//! negative payload types.

pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod handler;
pub mod plugin;
pub mod progress;
pub mod repair;
pub mod replay;
pub mod router;
pub mod runner;
pub mod sequence;
pub mod sequencer;
pub mod time;
pub mod traits;
pub mod transport;

pub use config::{check_membership, load_config, EngineConfig, HeartbeatConfig, IdleConfig, ReplicationConfig};
pub use engine::{CommandState, Engine, EngineParts, Step};
pub use error::{ConfigError, EngineError, EngineResult};
pub use frame::{
    Command, CommandHeader, Event, EventHeader, EventType, FrameError, PayloadTooLarge, MAX_PAYLOAD_LEN,
};
pub use handler::{ExceptionHandler, LoggingExceptionHandler};
pub use plugin::{install, Context, InstalledPlugin, Plugin, PluginEnv, PluginInput, PluginInstaller, TypeRange};
pub use progress::ReplayProgress;
pub use repair::{EventStoreRepairer, RepairReport, RepairStatus};
pub use replay::replay;
pub use router::{EventRouter, RouteError};
pub use runner::{BackoffIdle, Runner, RunnerHandle};
pub use sequence::{SequenceGenerator, MIN_RESERVED_SEQUENCE, NIL_SEQUENCE};
pub use sequencer::Sequencer;
pub use time::{ManualTimeSource, SystemTimeSource, TimeSource};
pub use traits::{CommandProcessor, EventApplier, Input, Received, Receiver};
pub use transport::{
    encode_transport_command, MessageReceiver, MessageSender, Output, Published, QueueTransport, SendResult,
    TransportInput,
};
