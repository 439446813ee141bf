//! Replication identity: who this server is and who currently leads.
//!
//! Leadership changes travel through the log like everything else, so every
//! replica agrees on the leader at every position. Elections and the wire
//! protocol between servers live outside the engine; they submit
//! `ProposeLeader` commands.

mod config;

use anyhow::Result;
use ordo_engine::{
    encode_transport_command, Command, CommandProcessor, Context, Event, EventApplier,
    EventRouter, Plugin, PluginEnv, TypeRange,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use config::ServerConfig;

use crate::error::{decode_command, decode_event, encode, PluginResult};

pub const REPLICATION_TYPES: TypeRange = TypeRange::new(-1300, -1200);
pub const REPLICATION_SOURCE_ID: i32 = -3;

pub const PROPOSE_LEADER: i32 = -1201;
pub const LEADER_CHANGED: i32 = -1201;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposeLeader {
    pub candidate_id: i32,
    pub term: i64,
}

impl ProposeLeader {
    pub fn to_payload(&self) -> PluginResult<Vec<u8>> {
        encode(self)
    }

    /// Message for a [`ordo_engine::TransportInput`].
    pub fn to_transport_message(&self) -> PluginResult<Vec<u8>> {
        Ok(encode_transport_command(PROPOSE_LEADER, &self.to_payload()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderChanged {
    pub leader_id: i32,
    pub term: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationState {
    server: ServerConfig,
    term: i64,
    leader_id: Option<i32>,
}

impl ReplicationState {
    pub fn new(server: ServerConfig) -> Self {
        Self {
            server,
            term: 0,
            leader_id: None,
        }
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    pub fn term(&self) -> i64 {
        self.term
    }

    pub fn leader_id(&self) -> Option<i32> {
        self.leader_id
    }

    pub fn is_leader(&self) -> bool {
        self.leader_id == Some(self.server.server_id())
    }
}

#[derive(Debug, Clone)]
pub struct ReplicationPlugin {
    server: ServerConfig,
}

impl ReplicationPlugin {
    pub fn new(server: ServerConfig) -> Self {
        Self { server }
    }
}

impl Plugin for ReplicationPlugin {
    type State = ReplicationState;

    fn name(&self) -> &'static str {
        "replication"
    }

    fn create_state(&self) -> ReplicationState {
        ReplicationState::new(self.server.clone())
    }

    fn create_context(&self, _env: &PluginEnv) -> Context<ReplicationState> {
        Context::new()
            .with_processor(REPLICATION_TYPES, LeadershipProcessor)
            .with_applier(REPLICATION_TYPES, LeadershipApplier)
    }
}

struct LeadershipProcessor;

impl CommandProcessor<ReplicationState> for LeadershipProcessor {
    fn on_command(
        &mut self,
        state: &ReplicationState,
        command: &Command<'_>,
        router: &mut EventRouter,
    ) -> Result<()> {
        if command.payload_type() != PROPOSE_LEADER {
            return Ok(());
        }
        let proposal: ProposeLeader = match decode_command(command) {
            Ok(proposal) => proposal,
            Err(e) => {
                debug!(error = %e, "Malformed leader proposal, ignoring");
                return Ok(());
            }
        };

        if !state.server.is_member(proposal.candidate_id) {
            debug!(candidate_id = proposal.candidate_id, "Proposed leader is not a member, ignoring");
            return Ok(());
        }
        if proposal.term <= state.term {
            debug!(
                term = proposal.term,
                current_term = state.term,
                "Stale leader proposal, ignoring"
            );
            return Ok(());
        }

        let changed = LeaderChanged {
            leader_id: proposal.candidate_id,
            term: proposal.term,
        };
        router.route_event(LEADER_CHANGED, &encode(&changed)?)?;
        Ok(())
    }
}

struct LeadershipApplier;

impl EventApplier<ReplicationState> for LeadershipApplier {
    fn on_event(&mut self, state: &mut ReplicationState, event: &Event<'_>) -> Result<()> {
        if event.payload_type() != LEADER_CHANGED {
            return Ok(());
        }
        let changed: LeaderChanged = decode_event(event)?;
        if changed.term > state.term {
            state.term = changed.term;
            state.leader_id = Some(changed.leader_id);
            info!(
                leader_id = changed.leader_id,
                term = changed.term,
                local = state.is_leader(),
                "Leader changed"
            );
        }
        Ok(())
    }
}
