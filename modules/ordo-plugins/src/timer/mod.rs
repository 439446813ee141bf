//! Timers driven entirely through the event log.
//!
//! Business logic starts and stops timers through [`TimerControl`], which only
//! routes `TimerStarted` / `TimerStopped` events; [`TimerState`] changes when
//! those events are applied. The plugin's input turns expired timers into
//! `TriggerTimer` commands, and the processor answers each with `TimerFired`,
//! which application appliers see as an ordinary system event.

mod control;
mod plugin;
mod state;

use ordo_engine::TypeRange;
use serde::{Deserialize, Serialize};

pub use control::TimerControl;
pub use plugin::TimerPlugin;
pub use state::{TimerEntry, TimerState};

/// Reserved command and event types of the timer plugin.
pub const TIMER_TYPES: TypeRange = TypeRange::new(-1100, -1000);

/// Source id of commands raised by the timer input.
pub const TIMER_SOURCE_ID: i32 = -1;

pub const TRIGGER_TIMER: i32 = -1001;

pub const TIMER_STARTED: i32 = -1001;
pub const TIMER_STOPPED: i32 = -1002;
pub const TIMER_FIRED: i32 = -1003;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerStarted {
    pub timer_type: i32,
    pub timeout: i64,
    #[serde(default)]
    pub period: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerStopped {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerTimer {
    pub id: i64,
}

/// Payload of a `TIMER_FIRED` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerFired {
    pub id: i64,
    pub timer_type: i32,
    pub timeout: i64,
}

impl TimerFired {
    /// Decode a `TIMER_FIRED` event; `None` for any other event.
    pub fn from_event(event: &ordo_engine::Event<'_>) -> Option<Self> {
        if event.payload_type() != TIMER_FIRED {
            return None;
        }
        serde_json::from_slice(event.payload()).ok()
    }
}
