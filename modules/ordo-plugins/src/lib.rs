//! System plugins for the ordo engine: timers, heartbeat, replication
//! identity.
//!
//! Each plugin owns a reserved range of negative payload types. Install them
//! with [`ordo_engine::install`] when assembling an engine.

pub mod error;
pub mod heartbeat;
pub mod replication;
pub mod timer;

pub use error::{PluginError, PluginResult};
pub use heartbeat::{Heartbeat, HeartbeatPlugin, HeartbeatState};
pub use replication::{LeaderChanged, ProposeLeader, ReplicationPlugin, ReplicationState, ServerConfig};
pub use timer::{TimerControl, TimerEntry, TimerFired, TimerPlugin, TimerState};
