//! Helper utilities for sftp-courier
//!
//! This module provides common utility functions used throughout the crate.

use chrono::{DateTime, Local};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default buffer size for IO operations
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Default connection timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default SFTP port
pub const DEFAULT_SFTP_PORT: u16 = 22;

/// Timestamp layout used for unique temp file suffixes
pub const TIMESTAMP_SUFFIX_FORMAT: &str = "%Y%m%d%H%M%S%3f";

/// Parse duration from milliseconds
pub fn duration_from_millis(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Milliseconds since the Unix epoch for `time`, clamped at zero
pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Split `name` into stem and extension, the extension keeping its dot
///
/// `report.txt` -> (`report`, `.txt`), `README` -> (`README`, ``)
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

/// Insert `suffix` between stem and extension
pub fn with_suffix(name: &str, suffix: &str) -> String {
    let (stem, ext) = split_extension(name);
    format!("{stem}{suffix}{ext}")
}

/// Append a `_<timestamp>` suffix so staged files never collide
pub fn with_timestamp_suffix(name: &str, now: DateTime<Local>) -> String {
    with_suffix(name, &format!("_{}", now.format(TIMESTAMP_SUFFIX_FORMAT)))
}

/// Retry configuration for operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new(max_retries: u32) -> Self {
        RetryConfig {
            max_retries,
            ..Default::default()
        }
    }

    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay_ms as u64);

        std::cmp::min(delay, self.max_delay)
    }
}
