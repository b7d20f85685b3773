//! Configuration file for moolad.

use crate::ServiceError;
use moola_core::{MemberId, MoolaEngineConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Engine configuration
    pub engine: MoolaEngineConfig,

    /// Members granted the first operator role when the in-memory role
    /// directory starts up.
    pub bootstrap_operators: Vec<MemberId>,

    /// Reconcile the leading team on this interval; disabled when unset.
    pub reconcile_interval_secs: Option<u64>,
}

impl ServiceConfig {
    pub fn from_toml(raw: &str) -> Result<Self, ServiceError> {
        let config: Self =
            toml::from_str(raw).map_err(|e| ServiceError::Config(format!("invalid config: {e}")))?;
        config.engine.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServiceError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ServiceError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&raw)
    }
}
