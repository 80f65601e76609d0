//! Connector configuration
//!
//! Connector-wide settings shared by every endpoint: connection and pool
//! tuning, socket options and the default transfer policy.

use super::{PolicyOverrides, PoolConfig};
use crate::helper::DEFAULT_CONNECT_TIMEOUT_SECS;
use crate::session::parse_auth_methods;
use serde::{Deserialize, Serialize};

fn default_name() -> String {
    "sftp".to_string()
}

fn default_connection_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

/// Default polling frequency in milliseconds
fn default_polling_frequency() -> u64 {
    1000
}

/// Default lock acquisition timeout in milliseconds
fn default_lock_timeout() -> u64 {
    100
}

/// Default keepalive seconds
fn default_keepalive_secs() -> u64 {
    20
}

/// Default keepalive interval
fn default_keepalive_interval() -> u64 {
    8
}

/// TCP socket options for SFTP connections
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TcpConfig {
    /// Enable TCP_NODELAY
    #[serde(default)]
    pub nodelay: bool,

    /// TCP keepalive timeout in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// TCP keepalive interval in seconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        TcpConfig {
            nodelay: true,
            keepalive_secs: default_keepalive_secs(),
            keepalive_interval: default_keepalive_interval(),
        }
    }
}

/// Connector configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConnectorConfig {
    /// Connector name, part of the inbound lock keys
    #[serde(default = "default_name")]
    pub name: String,

    /// Session pool configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// TCP socket options
    #[serde(default)]
    pub tcp: TcpConfig,

    /// Connect and handshake timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,

    /// Default polling frequency of inbound endpoints in milliseconds
    #[serde(default = "default_polling_frequency")]
    pub polling_frequency: u64,

    /// Comma separated authentication methods in order of preference
    #[serde(default)]
    pub preferred_auth_methods: Option<String>,

    /// How long a scanner waits for a per-file lock, in milliseconds
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout: u64,

    /// Default transfer policy of all endpoints
    #[serde(flatten)]
    pub policy: PolicyOverrides,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        ConnectorConfig {
            name: default_name(),
            pool: PoolConfig::default(),
            tcp: TcpConfig::default(),
            connection_timeout: default_connection_timeout(),
            polling_frequency: default_polling_frequency(),
            preferred_auth_methods: None,
            lock_timeout: default_lock_timeout(),
            policy: PolicyOverrides::default(),
        }
    }
}

impl ConnectorConfig {
    /// Validate the connector configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("connector name must not be empty".to_string());
        }
        if self.connection_timeout == 0 {
            return Err("connection_timeout must be greater than 0".to_string());
        }
        if self.polling_frequency == 0 {
            return Err("polling_frequency must be greater than 0".to_string());
        }
        if let Some(methods) = &self.preferred_auth_methods {
            parse_auth_methods(methods).map_err(|e| e.to_string())?;
        }
        self.pool.validate()?;
        self.policy.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_defaults() {
        let config = ConnectorConfig::default();
        assert_eq!(config.name, "sftp");
        assert_eq!(config.connection_timeout, 10);
        assert_eq!(config.polling_frequency, 1000);
        assert_eq!(config.lock_timeout, 100);
        assert!(config.tcp.nodelay);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_auth_methods() {
        let mut config = ConnectorConfig {
            preferred_auth_methods: Some("publickey,password".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.preferred_auth_methods = Some("publickey,magic".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.contains("magic"));
    }

    #[test]
    fn test_validate_zero_polling_frequency() {
        let config = ConnectorConfig {
            polling_frequency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
