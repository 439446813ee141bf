use ordo_engine::{check_membership, ConfigError, ReplicationConfig};

/// Local identity within a fixed, ordered membership. Validated once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    server_id: i32,
    server_ids: Vec<i32>,
}

impl ServerConfig {
    /// Fails unless `server_id` is one of `server_ids`, the membership is
    /// non-empty and no member is listed twice.
    pub fn new(server_id: i32, server_ids: Vec<i32>) -> Result<Self, ConfigError> {
        check_membership(server_id, &server_ids)?;
        Ok(Self {
            server_id,
            server_ids,
        })
    }

    pub fn from_config(config: &ReplicationConfig) -> Result<Self, ConfigError> {
        Self::new(config.server_id, config.server_ids.clone())
    }

    pub fn server_id(&self) -> i32 {
        self.server_id
    }

    pub fn server_ids(&self) -> &[i32] {
        &self.server_ids
    }

    pub fn is_member(&self, server_id: i32) -> bool {
        self.server_ids.contains(&server_id)
    }

    /// Position of the local server in the membership.
    pub fn server_index(&self) -> usize {
        self.server_ids
            .iter()
            .position(|id| *id == self.server_id)
            .unwrap_or_default()
    }
}
