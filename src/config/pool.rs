//! Session pool configuration
//!
//! Defines how many sessions each endpoint may keep open.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default maximum pool size (no pooling)
fn default_max_connection_pool_size() -> i32 {
    0
}

/// Default validate-on-borrow setting
fn default_validate_connections() -> bool {
    true
}

/// Default acquire timeout in seconds
fn default_acquire_timeout() -> u64 {
    30
}

/// Default idle timeout in seconds
fn default_idle_timeout() -> u64 {
    300
}

/// Effective sizing rule of an endpoint pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolLimit {
    /// Every acquire creates a fresh session, destroyed on release
    Disabled,
    /// Sessions are cached without an upper bound
    Unbounded,
    /// At most this many sessions are borrowed at once
    Bounded(usize),
}

impl PoolLimit {
    /// Interpret the configured size: `0` none, `-1` unbounded, `n > 0` bounded
    pub fn from_size(size: i32) -> Result<Self, String> {
        match size {
            0 => Ok(PoolLimit::Disabled),
            -1 => Ok(PoolLimit::Unbounded),
            n if n > 0 => Ok(PoolLimit::Bounded(n as usize)),
            n => Err(format!(
                "max_connection_pool_size must be -1, 0 or positive, got {}",
                n
            )),
        }
    }

    /// Whether released sessions are kept for reuse
    pub fn is_pooling(&self) -> bool {
        !matches!(self, PoolLimit::Disabled)
    }
}

impl fmt::Display for PoolLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolLimit::Disabled => f.write_str("disabled"),
            PoolLimit::Unbounded => f.write_str("unbounded"),
            PoolLimit::Bounded(n) => write!(f, "{}", n),
        }
    }
}

/// Session pool configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolConfig {
    /// Maximum sessions per endpoint: 0 = no pooling, -1 = unbounded
    #[serde(default = "default_max_connection_pool_size")]
    pub max_connection_pool_size: i32,

    /// Check that a pooled session is still connected before lending it
    #[serde(default = "default_validate_connections")]
    pub validate_connections: bool,

    /// Maximum time to wait for a session from an exhausted pool, in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: u64,

    /// Idle sessions older than this are discarded on borrow, in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_connection_pool_size: default_max_connection_pool_size(),
            validate_connections: default_validate_connections(),
            acquire_timeout: default_acquire_timeout(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

impl PoolConfig {
    /// Effective pool limit
    pub fn limit(&self) -> PoolLimit {
        PoolLimit::from_size(self.max_connection_pool_size).unwrap_or(PoolLimit::Disabled)
    }

    /// Validate the pool configuration
    pub fn validate(&self) -> Result<(), String> {
        PoolLimit::from_size(self.max_connection_pool_size)?;
        if self.acquire_timeout == 0 {
            return Err("acquire_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}
