//! Transfer policy
//!
//! A [`TransferPolicy`] is resolved once per endpoint by laying the
//! endpoint's [`PolicyOverrides`] over the connector-wide ones, and is
//! read-only afterwards.

use super::PoolLimit;
use crate::helper::duration_from_millis;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// What to do when the outbound target file already exists
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateHandling {
    /// Fail the transfer
    #[default]
    #[serde(alias = "throwException")]
    Throw,
    /// Replace the existing file
    Overwrite,
    /// Append to the existing file
    Append,
    /// Pick the first free `name_N.ext`
    #[serde(alias = "addSeqNo")]
    UniqueSuffix,
}

/// Optional policy settings, set at connector level or per endpoint
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct PolicyOverrides {
    /// Duplicate handling for outbound transfers
    #[serde(default)]
    pub duplicate_handling: Option<DuplicateHandling>,

    /// Delete inbound files once they have been consumed
    #[serde(default)]
    pub auto_delete: Option<bool>,

    /// Keep the remote file when downstream processing fails
    #[serde(default)]
    pub keep_file_on_error: Option<bool>,

    /// Minimum file age in milliseconds before a file is picked up (0 = off)
    #[serde(default)]
    pub file_age: Option<u64>,

    /// Delay between the two size samples in milliseconds (0 = off)
    #[serde(default)]
    pub size_check_wait_time: Option<u64>,

    /// Remote directory inbound files are moved into before reading
    #[serde(default)]
    pub temp_dir_inbound: Option<String>,

    /// Remote directory outbound files are written into before the final rename
    #[serde(default)]
    pub temp_dir_outbound: Option<String>,

    /// Add a timestamp suffix to staged file names
    #[serde(default)]
    pub use_temp_file_timestamp_suffix: Option<bool>,

    /// Local directory receiving a copy of every inbound file
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,

    /// Local directory holding archive copies while they are being written
    #[serde(default)]
    pub archive_temp_receiving_dir: Option<PathBuf>,

    /// Local directory holding complete archive copies until post-processing
    #[serde(default)]
    pub archive_temp_sending_dir: Option<PathBuf>,

    /// Outbound filename pattern
    #[serde(default)]
    pub output_pattern: Option<String>,

    /// Comma separated wildcard patterns inbound file names must match
    #[serde(default)]
    pub file_filter: Option<String>,
}

impl PolicyOverrides {
    /// Overlay `other` on `self`; values set in `other` win
    pub fn merged_with(&self, other: &PolicyOverrides) -> PolicyOverrides {
        PolicyOverrides {
            duplicate_handling: other.duplicate_handling.or(self.duplicate_handling),
            auto_delete: other.auto_delete.or(self.auto_delete),
            keep_file_on_error: other.keep_file_on_error.or(self.keep_file_on_error),
            file_age: other.file_age.or(self.file_age),
            size_check_wait_time: other.size_check_wait_time.or(self.size_check_wait_time),
            temp_dir_inbound: other
                .temp_dir_inbound
                .clone()
                .or_else(|| self.temp_dir_inbound.clone()),
            temp_dir_outbound: other
                .temp_dir_outbound
                .clone()
                .or_else(|| self.temp_dir_outbound.clone()),
            use_temp_file_timestamp_suffix: other
                .use_temp_file_timestamp_suffix
                .or(self.use_temp_file_timestamp_suffix),
            archive_dir: other.archive_dir.clone().or_else(|| self.archive_dir.clone()),
            archive_temp_receiving_dir: other
                .archive_temp_receiving_dir
                .clone()
                .or_else(|| self.archive_temp_receiving_dir.clone()),
            archive_temp_sending_dir: other
                .archive_temp_sending_dir
                .clone()
                .or_else(|| self.archive_temp_sending_dir.clone()),
            output_pattern: other
                .output_pattern
                .clone()
                .or_else(|| self.output_pattern.clone()),
            file_filter: other.file_filter.clone().or_else(|| self.file_filter.clone()),
        }
    }

    /// Validate settings that must agree with each other
    pub fn validate(&self) -> Result<(), String> {
        if self.archive_dir.is_none()
            && (self.archive_temp_receiving_dir.is_some()
                || self.archive_temp_sending_dir.is_some())
        {
            return Err("archive temp directories require archive_dir".to_string());
        }
        if let Some(filter) = &self.file_filter {
            if filter.split(',').all(|p| p.trim().is_empty()) {
                return Err("file_filter must contain at least one pattern".to_string());
            }
        }
        Ok(())
    }
}

/// Local archive locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePolicy {
    /// Final archive directory
    pub dir: PathBuf,
    /// Where copies are written while the remote file is being read
    pub temp_receiving_dir: PathBuf,
    /// Where complete copies wait until the stream is post-processed
    pub temp_sending_dir: PathBuf,
}

/// Effective transfer settings of one endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct TransferPolicy {
    /// Duplicate handling for outbound transfers
    pub duplicate_handling: DuplicateHandling,
    /// Delete inbound files once consumed
    pub auto_delete: bool,
    /// Keep the remote file when downstream processing fails
    pub keep_file_on_error: bool,
    /// Minimum file age before pickup
    pub file_age: Option<Duration>,
    /// Delay between size samples
    pub size_check_delay: Option<Duration>,
    /// Inbound staging directory
    pub temp_dir_inbound: Option<String>,
    /// Outbound staging directory
    pub temp_dir_outbound: Option<String>,
    /// Suffix staged names with a timestamp
    pub use_temp_file_timestamp_suffix: bool,
    /// Archive locations
    pub archive: Option<ArchivePolicy>,
    /// Effective pool size
    pub max_pool_size: PoolLimit,
    /// Outbound filename pattern
    pub output_pattern: Option<String>,
    /// Inbound name filter
    pub file_filter: Option<String>,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        TransferPolicy::resolve(&PolicyOverrides::default(), PoolLimit::Disabled)
    }
}

fn non_zero_millis(value: Option<u64>) -> Option<Duration> {
    value.filter(|ms| *ms > 0).map(duration_from_millis)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl TransferPolicy {
    /// Build the effective policy from already merged overrides
    pub fn resolve(overrides: &PolicyOverrides, max_pool_size: PoolLimit) -> Self {
        let archive = overrides.archive_dir.clone().map(|dir| ArchivePolicy {
            temp_receiving_dir: overrides
                .archive_temp_receiving_dir
                .clone()
                .unwrap_or_else(|| dir.join(".receiving")),
            temp_sending_dir: overrides
                .archive_temp_sending_dir
                .clone()
                .unwrap_or_else(|| dir.join(".sending")),
            dir,
        });

        TransferPolicy {
            duplicate_handling: overrides.duplicate_handling.unwrap_or_default(),
            auto_delete: overrides.auto_delete.unwrap_or(true),
            keep_file_on_error: overrides.keep_file_on_error.unwrap_or(true),
            file_age: non_zero_millis(overrides.file_age),
            size_check_delay: non_zero_millis(overrides.size_check_wait_time),
            temp_dir_inbound: non_empty(overrides.temp_dir_inbound.clone()),
            temp_dir_outbound: non_empty(overrides.temp_dir_outbound.clone()),
            use_temp_file_timestamp_suffix: overrides
                .use_temp_file_timestamp_suffix
                .unwrap_or(false),
            archive,
            max_pool_size,
            output_pattern: non_empty(overrides.output_pattern.clone()),
            file_filter: non_empty(overrides.file_filter.clone()),
        }
    }
}
