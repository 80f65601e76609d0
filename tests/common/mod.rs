//! Test utilities for sftp-courier
//!
//! Integration tests run against the in-memory session backend.

#![allow(dead_code)]

use async_trait::async_trait;
use sftp_courier::config::{
    Credentials, DuplicateHandling, EndpointAddress, PoolConfig, PoolLimit, TransferPolicy,
};
use sftp_courier::coordinator::TransferCoordinator;
use sftp_courier::error::{Result, TransferError};
use sftp_courier::inbound::{Delivery, FileConsumer};
use sftp_courier::session::{MemoryFileSystem, MemorySessionFactory};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Coordinator over the memory backend
pub type MemoryCoordinator = TransferCoordinator<MemorySessionFactory>;

/// Endpoint on the memory backend rooted at `path`
pub fn endpoint(path: &str) -> EndpointAddress {
    EndpointAddress::new(
        "memory",
        22,
        "courier",
        path,
        Credentials::Password("secret".to_string()),
    )
}

/// Coordinator sharing `fs`
pub fn coordinator(fs: &MemoryFileSystem) -> Arc<MemoryCoordinator> {
    Arc::new(TransferCoordinator::new(
        "test-connector",
        Arc::new(MemorySessionFactory::new(fs.clone())),
        PoolConfig {
            acquire_timeout: 2,
            ..PoolConfig::default()
        },
    ))
}

/// Live borrowed sessions of every pool
pub async fn sessions_in_use(coordinator: &MemoryCoordinator) -> usize {
    coordinator
        .pool_stats()
        .await
        .iter()
        .map(|(_, stats)| stats.in_use_count)
        .sum()
}

/// Transfer policy builder
pub struct TestPolicyBuilder {
    policy: TransferPolicy,
}

impl Default for TestPolicyBuilder {
    fn default() -> Self {
        TestPolicyBuilder {
            policy: TransferPolicy {
                max_pool_size: PoolLimit::Bounded(2),
                ..TransferPolicy::default()
            },
        }
    }
}

impl TestPolicyBuilder {
    /// Create a new policy builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool size
    pub fn pool(mut self, limit: PoolLimit) -> Self {
        self.policy.max_pool_size = limit;
        self
    }

    /// Set the minimum file age
    pub fn file_age(mut self, age: Duration) -> Self {
        self.policy.file_age = Some(age);
        self
    }

    /// Set the size check delay
    pub fn size_check(mut self, delay: Duration) -> Self {
        self.policy.size_check_delay = Some(delay);
        self
    }

    /// Set the inbound staging directory
    pub fn temp_dir_inbound(mut self, dir: &str) -> Self {
        self.policy.temp_dir_inbound = Some(dir.to_string());
        self
    }

    /// Set the outbound staging directory
    pub fn temp_dir_outbound(mut self, dir: &str) -> Self {
        self.policy.temp_dir_outbound = Some(dir.to_string());
        self
    }

    /// Set duplicate handling
    pub fn duplicates(mut self, handling: DuplicateHandling) -> Self {
        self.policy.duplicate_handling = handling;
        self
    }

    /// Set auto delete
    pub fn auto_delete(mut self, enabled: bool) -> Self {
        self.policy.auto_delete = enabled;
        self
    }

    /// Build the policy
    pub fn build(self) -> TransferPolicy {
        self.policy
    }
}

/// Consumer recording every routed file
#[derive(Debug, Default)]
pub struct RecordingConsumer {
    files: Mutex<Vec<(String, Vec<u8>)>>,
    calls: AtomicUsize,
    reject: bool,
    delay: Option<Duration>,
}

impl RecordingConsumer {
    /// Accept everything
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject everything after reading it
    pub fn rejecting() -> Arc<Self> {
        Arc::new(RecordingConsumer {
            reject: true,
            ..Self::default()
        })
    }

    /// Accept everything, taking `delay` per file
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(RecordingConsumer {
            delay: Some(delay),
            ..Self::default()
        })
    }

    /// Number of route calls
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Original names and content of routed files, in order
    pub fn files(&self) -> Vec<(String, Vec<u8>)> {
        self.files.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileConsumer for RecordingConsumer {
    async fn route_file(&self, delivery: Delivery<'_>) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut content = Vec::new();
        delivery.reader.read_to_end(&mut content).await?;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.files
            .lock()
            .unwrap()
            .push((delivery.original_filename.to_string(), content));
        if self.reject {
            return Err(TransferError::Validation("rejected by consumer".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_builder() {
        let policy = TestPolicyBuilder::new()
            .pool(PoolLimit::Unbounded)
            .file_age(Duration::from_secs(1))
            .temp_dir_inbound("tmp")
            .auto_delete(false)
            .build();

        assert_eq!(policy.max_pool_size, PoolLimit::Unbounded);
        assert_eq!(policy.file_age, Some(Duration::from_secs(1)));
        assert_eq!(policy.temp_dir_inbound.as_deref(), Some("tmp"));
        assert!(!policy.auto_delete);
    }

    #[test]
    fn test_endpoint() {
        let endpoint = endpoint("/in");
        assert_eq!(endpoint.path(), "/in");
        assert_eq!(endpoint.host(), "memory");
    }
}
