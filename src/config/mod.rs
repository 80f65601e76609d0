//! Configuration module for sftp-courier
//!
//! This module provides configuration types and parsing for the connector
//! and its inbound and outbound endpoints.

mod connector;
mod endpoint;
mod policy;
mod pool;

pub use connector::{ConnectorConfig, TcpConfig};
pub use endpoint::{Credentials, EndpointAddress, EndpointConfig};
pub use policy::{ArchivePolicy, DuplicateHandling, PolicyOverrides, TransferPolicy};
pub use pool::{PoolConfig, PoolLimit};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Environment variable overriding `connector.pool.max_connection_pool_size`
pub const MAX_POOL_SIZE_ENV: &str = "SFTP_COURIER_MAX_POOL_SIZE";

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Connector-wide settings
    #[serde(default)]
    pub connector: ConnectorConfig,

    /// Polled remote directories
    #[serde(default)]
    pub inbound: Vec<EndpointConfig>,

    /// Remote directories files are delivered to
    #[serde(default)]
    pub outbound: Vec<EndpointConfig>,
}

impl Config {
    /// Validate the whole configuration
    pub fn validate(&self) -> Result<(), String> {
        self.connector.validate()?;

        let mut names = HashSet::new();
        for endpoint in self.inbound.iter().chain(self.outbound.iter()) {
            endpoint.validate()?;
            if !names.insert(endpoint.name.as_str()) {
                return Err(format!("duplicate endpoint name '{}'", endpoint.name));
            }
        }
        for endpoint in &self.inbound {
            if endpoint.deliver_to.is_none() {
                return Err(format!(
                    "inbound endpoint '{}' has no deliver_to directory",
                    endpoint.name
                ));
            }
            if endpoint.polling_frequency == Some(0) {
                return Err(format!(
                    "inbound endpoint '{}': polling_frequency must be greater than 0",
                    endpoint.name
                ));
            }
        }
        Ok(())
    }

    /// Effective policy of `endpoint`
    pub fn policy_for(&self, endpoint: &EndpointConfig) -> TransferPolicy {
        let merged = self.connector.policy.merged_with(&endpoint.policy);
        TransferPolicy::resolve(&merged, self.connector.pool.limit())
    }

    /// Find an outbound endpoint by name
    pub fn outbound_endpoint(&self, name: &str) -> Option<&EndpointConfig> {
        self.outbound.iter().find(|e| e.name == name)
    }
}

/// Load configuration from a TOML file
///
/// Environment overrides are applied before validation.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    let mut config = parse_config(&content)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate().map_err(|e| anyhow!(e))?;
    Ok(config)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse configuration")
}

/// Apply overrides looked up through `lookup`
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(MAX_POOL_SIZE_ENV) {
        let size: i32 = match raw.trim().parse() {
            Ok(size) => size,
            Err(_) => bail!("{} must be an integer, got '{}'", MAX_POOL_SIZE_ENV, raw),
        };
        PoolLimit::from_size(size).map_err(|e| anyhow!("{}: {}", MAX_POOL_SIZE_ENV, e))?;
        tracing::debug!("{} overrides pool size with {}", MAX_POOL_SIZE_ENV, size);
        config.connector.pool.max_connection_pool_size = size;
    }
    Ok(())
}
