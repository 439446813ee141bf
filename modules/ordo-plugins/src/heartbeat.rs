//! Periodic heartbeat through the log.
//!
//! The input raises a `Heartbeat` command once per interval; the processor
//! turns it into a `Heartbeat` event stamped with the command time. Replicas
//! replaying the log see the same heartbeats at the same positions.

use std::sync::Arc;

use anyhow::Result;
use ordo_engine::{
    Command, ConfigError, Context, Event, EventRouter, HeartbeatConfig, Plugin, PluginEnv,
    PluginInput, Received, Receiver, TimeSource, TypeRange,
};
use serde::{Deserialize, Serialize};

use crate::error::{decode_event, encode};

pub const HEARTBEAT_TYPES: TypeRange = TypeRange::new(-1200, -1100);
pub const HEARTBEAT_SOURCE_ID: i32 = -2;
pub const HEARTBEAT: i32 = -1101;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub time: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeartbeatState {
    pub last_heartbeat_time: Option<i64>,
    pub count: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatPlugin {
    interval_millis: i64,
}

impl HeartbeatPlugin {
    pub fn new(interval_millis: i64) -> Result<Self, ConfigError> {
        if interval_millis <= 0 {
            return Err(ConfigError::NotPositive {
                name: "heartbeat.interval_millis",
                value: interval_millis,
            });
        }
        Ok(Self { interval_millis })
    }

    pub fn from_config(config: &HeartbeatConfig) -> Result<Self, ConfigError> {
        Self::new(config.interval_millis)
    }
}

impl Plugin for HeartbeatPlugin {
    type State = HeartbeatState;

    fn name(&self) -> &'static str {
        "heartbeat"
    }

    fn create_state(&self) -> HeartbeatState {
        HeartbeatState::default()
    }

    fn create_context(&self, env: &PluginEnv) -> Context<HeartbeatState> {
        Context::new()
            .with_input(HeartbeatInput {
                time: env.time.clone(),
                interval_millis: self.interval_millis,
                last_sent: None,
            })
            .with_processor(
                HEARTBEAT_TYPES,
                |_: &HeartbeatState, command: &Command<'_>, router: &mut EventRouter| -> Result<()> {
                    if command.payload_type() == HEARTBEAT {
                        let heartbeat = Heartbeat {
                            time: command.command_time(),
                        };
                        router.route_event(HEARTBEAT, &encode(&heartbeat)?)?;
                    }
                    Ok(())
                },
            )
            .with_applier(
                HEARTBEAT_TYPES,
                |state: &mut HeartbeatState, event: &Event<'_>| -> Result<()> {
                    if event.payload_type() == HEARTBEAT {
                        let heartbeat: Heartbeat = decode_event(event)?;
                        state.last_heartbeat_time = Some(heartbeat.time);
                        state.count += 1;
                    }
                    Ok(())
                },
            )
    }
}

struct HeartbeatInput {
    time: Arc<dyn TimeSource>,
    interval_millis: i64,
    last_sent: Option<i64>,
}

impl PluginInput<HeartbeatState> for HeartbeatInput {
    fn poll(&mut self, state: &HeartbeatState, receiver: &mut dyn Receiver) -> Result<usize> {
        let now = self.time.current_time();
        let last = match (self.last_sent, state.last_heartbeat_time) {
            (Some(sent), Some(applied)) => Some(sent.max(applied)),
            (sent, applied) => sent.or(applied),
        };
        if last.is_some_and(|last| now - last < self.interval_millis) {
            return Ok(0);
        }

        match receiver.receive(HEARTBEAT_SOURCE_ID, None, HEARTBEAT, &[])? {
            Received::Backpressure => Ok(0),
            Received::Accepted(_) | Received::Duplicate => {
                self.last_sent = Some(now);
                Ok(1)
            }
        }
    }
}
