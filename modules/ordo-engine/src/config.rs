//! Engine configuration: TOML file, environment overrides, eager validation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ordo_store::{StoreConfig, StoreMode};
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub command_store: StoreConfig,
    pub event_store: StoreConfig,
    #[serde(default)]
    pub idle: IdleConfig,
    #[serde(default)]
    pub heartbeat: Option<HeartbeatConfig>,
    #[serde(default)]
    pub replication: Option<ReplicationConfig>,
}

/// Run loop idle strategy. See [`crate::runner::BackoffIdle`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct IdleConfig {
    pub spin_steps: u32,
    pub yield_steps: u32,
    pub min_park_micros: u64,
    pub max_park_micros: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            spin_steps: 100,
            yield_steps: 10,
            min_park_micros: 50,
            max_park_micros: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatConfig {
    pub interval_millis: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicationConfig {
    pub server_id: i32,
    pub server_ids: Vec<i32>,
}

impl Default for EngineConfig {
    /// In-memory stores: a remove-on-poll command queue and a keep-on-poll
    /// event log.
    fn default() -> Self {
        Self {
            command_store: StoreConfig::memory(StoreMode::RemoveOnPoll),
            event_store: StoreConfig::memory(StoreMode::KeepOnPoll),
            idle: IdleConfig::default(),
            heartbeat: None,
            replication: None,
        }
    }
}

impl EngineConfig {
    /// Load from `ORDO_CONFIG` when set, otherwise start from defaults, then
    /// apply `ORDO_*` overrides. Reads `.env` first.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match std::env::var("ORDO_CONFIG") {
            Ok(path) if !path.is_empty() => load_config(Path::new(&path))?,
            _ => Self::default(),
        };

        if let Some(kind) = env_opt("ORDO_COMMAND_STORE_KIND") {
            config.command_store.kind = kind;
        }
        if let Some(path) = env_opt("ORDO_COMMAND_STORE_PATH") {
            config.command_store.path = Some(PathBuf::from(path));
        }
        if let Some(mode) = env_opt("ORDO_COMMAND_STORE_MODE") {
            config.command_store.mode = parse_mode(&mode)?;
        }
        if let Some(kind) = env_opt("ORDO_EVENT_STORE_KIND") {
            config.event_store.kind = kind;
        }
        if let Some(path) = env_opt("ORDO_EVENT_STORE_PATH") {
            config.event_store.path = Some(PathBuf::from(path));
        }
        if let Some(interval) = env_opt("ORDO_HEARTBEAT_INTERVAL_MILLIS") {
            let interval_millis = interval
                .parse()
                .with_context(|| format!("ORDO_HEARTBEAT_INTERVAL_MILLIS is not a number: {interval}"))?;
            config.heartbeat = Some(HeartbeatConfig { interval_millis });
        }
        if let Some(server_id) = env_opt("ORDO_SERVER_ID") {
            let server_id = server_id
                .parse()
                .with_context(|| format!("ORDO_SERVER_ID is not a number: {server_id}"))?;
            let server_ids = std::env::var("ORDO_SERVER_IDS")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse()
                        .with_context(|| format!("ORDO_SERVER_IDS entry is not a number: {s}"))
                })
                .collect::<Result<Vec<i32>>>()?;
            config.replication = Some(ReplicationConfig {
                server_id,
                server_ids,
            });
        }

        config.validate()?;
        config.log_summary();
        Ok(config)
    }

    /// Fail fast on anything the engine would reject later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.command_store.validate()?;
        self.event_store.validate()?;

        if self.idle.min_park_micros == 0 {
            return Err(ConfigError::NotPositive {
                name: "idle.min_park_micros",
                value: 0,
            });
        }
        if self.idle.min_park_micros > self.idle.max_park_micros {
            return Err(ConfigError::OutOfOrder {
                name: "idle.min_park_micros",
                min: to_i64(self.idle.min_park_micros),
                max_name: "idle.max_park_micros",
                max: to_i64(self.idle.max_park_micros),
            });
        }
        if let Some(heartbeat) = &self.heartbeat {
            if heartbeat.interval_millis <= 0 {
                return Err(ConfigError::NotPositive {
                    name: "heartbeat.interval_millis",
                    value: heartbeat.interval_millis,
                });
            }
        }
        if let Some(replication) = &self.replication {
            check_membership(replication.server_id, &replication.server_ids)?;
        }
        Ok(())
    }

    pub fn log_summary(&self) {
        fn store(config: &StoreConfig) -> String {
            match &config.path {
                Some(path) => format!("{} {:?} at {}", config.kind, config.mode, path.display()),
                None => format!("{} {:?}", config.kind, config.mode),
            }
        }

        tracing::info!("Config loaded:");
        tracing::info!("  command_store: {}", store(&self.command_store));
        tracing::info!("  event_store: {}", store(&self.event_store));
        tracing::info!(
            "  idle: spin {} yield {} park {}..{}us",
            self.idle.spin_steps,
            self.idle.yield_steps,
            self.idle.min_park_micros,
            self.idle.max_park_micros
        );
        match &self.heartbeat {
            Some(heartbeat) => tracing::info!("  heartbeat: every {}ms", heartbeat.interval_millis),
            None => tracing::info!("  heartbeat: <not set>"),
        }
        match &self.replication {
            Some(r) => tracing::info!("  replication: server {} of {:?}", r.server_id, r.server_ids),
            None => tracing::info!("  replication: <not set>"),
        }
    }
}

/// Membership rules shared by configuration and the replication plugin:
/// non-empty, no duplicates, and the local server is a member.
pub fn check_membership(server_id: i32, server_ids: &[i32]) -> Result<(), ConfigError> {
    if server_ids.is_empty() {
        return Err(ConfigError::EmptyMembership);
    }
    let mut seen = HashSet::with_capacity(server_ids.len());
    for id in server_ids {
        if !seen.insert(*id) {
            return Err(ConfigError::DuplicateMember(*id));
        }
    }
    if !seen.contains(&server_id) {
        return Err(ConfigError::NotAMember {
            server_id,
            server_ids: server_ids.to_vec(),
        });
    }
    Ok(())
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: EngineConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file: {}", path.display()))?;
    Ok(config)
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_mode(value: &str) -> Result<StoreMode> {
    match value {
        "keep-on-poll" => Ok(StoreMode::KeepOnPoll),
        "remove-on-poll" => Ok(StoreMode::RemoveOnPoll),
        other => anyhow::bail!("unknown store mode: {other}"),
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_file() {
        let config: EngineConfig = toml::from_str(
            r#"
            [command_store]
            kind = "memory"
            mode = "remove-on-poll"
            capacity = 1024

            [event_store]
            kind = "file"
            path = "/var/lib/ordo/events.log"
            sync_on_commit = true

            [idle]
            spin_steps = 10

            [heartbeat]
            interval_millis = 500

            [replication]
            server_id = 2
            server_ids = [1, 2, 3]
            "#,
        )
        .unwrap();

        assert_eq!(config.command_store.mode, StoreMode::RemoveOnPoll);
        assert_eq!(config.command_store.capacity, Some(1024));
        assert!(config.event_store.sync_on_commit);
        assert_eq!(config.idle.spin_steps, 10);
        assert_eq!(config.idle.max_park_micros, 1_000);
        config.validate().unwrap();
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed = toml::from_str::<EngineConfig>(
            r#"
            [command_store]
            [event_store]
            colour = "blue"
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn invalid_values_fail_validation() {
        let mut config = EngineConfig::default();
        config.heartbeat = Some(HeartbeatConfig { interval_millis: 0 });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositive { name: "heartbeat.interval_millis", .. })
        ));

        let mut config = EngineConfig::default();
        config.idle.min_park_micros = 5_000;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfOrder { .. })));

        let mut config = EngineConfig::default();
        config.replication = Some(ReplicationConfig {
            server_id: 9,
            server_ids: vec![1, 2, 3],
        });
        assert!(matches!(config.validate(), Err(ConfigError::NotAMember { server_id: 9, .. })));
    }

    #[test]
    fn membership_rejects_empty_and_duplicates() {
        assert!(matches!(check_membership(1, &[]), Err(ConfigError::EmptyMembership)));
        assert!(matches!(
            check_membership(1, &[1, 2, 2]),
            Err(ConfigError::DuplicateMember(2))
        ));
        assert!(check_membership(3, &[1, 2, 3]).is_ok());
    }
}
