use ordo_engine::{Command, Event, RouteError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("timer period must be positive, got {0}")]
    InvalidPeriod(i64),

    #[error("payload encoding: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Route(#[from] RouteError),
}

pub type PluginResult<T> = std::result::Result<T, PluginError>;

/// System payloads are JSON.
pub(crate) fn encode<T: Serialize>(value: &T) -> PluginResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn decode_command<T: DeserializeOwned>(command: &Command<'_>) -> PluginResult<T> {
    Ok(serde_json::from_slice(command.payload())?)
}

pub(crate) fn decode_event<T: DeserializeOwned>(event: &Event<'_>) -> PluginResult<T> {
    Ok(serde_json::from_slice(event.payload())?)
}
