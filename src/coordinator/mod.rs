//! Transfer coordinator
//!
//! The coordinator is the shared entry point for scanners and dispatchers.
//! It owns one session pool per endpoint, created lazily on first use, the
//! lock serializing remote directory creation, the transfer notifier and
//! the connector's connected flag.

mod notify;

pub use notify::{TransferAction, TransferEvent, TransferNotifier, DEFAULT_NOTIFY_CAPACITY};

use crate::config::{EndpointAddress, PoolConfig, PoolLimit};
use crate::error::Result;
use crate::pool::{PoolStatsSnapshot, PooledSession, SessionPool};
use crate::session::{ensure_directory, RemoteFileSession, SessionFactory};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Shared access point to pooled sessions
pub struct TransferCoordinator<F: SessionFactory> {
    /// Connector name
    name: String,
    /// Session factory shared by all pools
    factory: Arc<F>,
    /// Pool tuning
    pool_config: PoolConfig,
    /// Endpoint pools
    pools: Mutex<HashMap<EndpointAddress, SessionPool<F>>>,
    /// Serializes remote directory creation
    dir_lock: Mutex<()>,
    /// Transfer notifications
    notifier: TransferNotifier,
    /// Whether the last connect or listing succeeded
    connected: AtomicBool,
}

impl<F: SessionFactory> std::fmt::Debug for TransferCoordinator<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferCoordinator")
            .field("name", &self.name)
            .field("factory", &self.factory)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl<F: SessionFactory> TransferCoordinator<F> {
    /// Create a coordinator
    pub fn new(name: impl Into<String>, factory: Arc<F>, pool_config: PoolConfig) -> Self {
        TransferCoordinator {
            name: name.into(),
            factory,
            pool_config,
            pools: Mutex::new(HashMap::new()),
            dir_lock: Mutex::new(()),
            notifier: TransferNotifier::default(),
            connected: AtomicBool::new(true),
        }
    }

    /// Connector name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session factory
    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    /// Transfer notifier
    pub fn notifier(&self) -> &TransferNotifier {
        &self.notifier
    }

    /// The pool of `endpoint`, created with `limit` on first use
    pub async fn pool(&self, endpoint: &EndpointAddress, limit: PoolLimit) -> SessionPool<F> {
        let mut pools = self.pools.lock().await;
        pools
            .entry(endpoint.clone())
            .or_insert_with(|| {
                SessionPool::new(
                    endpoint.clone(),
                    self.factory.clone(),
                    limit,
                    &self.pool_config,
                )
            })
            .clone()
    }

    /// Borrow a session for `endpoint`, positioned in the endpoint directory
    ///
    /// If the endpoint directory cannot be entered the session goes back to
    /// the pool, or is discarded after a connection failure, and the error is
    /// returned.
    pub async fn acquire(
        &self,
        endpoint: &EndpointAddress,
        limit: PoolLimit,
    ) -> Result<PooledSession<F>> {
        let pool = self.pool(endpoint, limit).await;
        let mut session = match pool.acquire().await {
            Ok(session) => session,
            Err(e) => {
                if e.is_connection_failure() {
                    self.mark_disconnected();
                }
                return Err(e);
            }
        };
        self.mark_connected();

        if let Err(e) = session.change_directory(endpoint.path()).await {
            warn!(endpoint = %endpoint, "Cannot enter endpoint directory: {}", e);
            if e.is_connection_failure() {
                self.mark_disconnected();
            }
            session.finish_with_error(&e).await;
            return Err(e);
        }
        debug!(endpoint = %endpoint, "Session acquired");
        Ok(session)
    }

    /// Return a session to its pool, disconnecting it if it is broken
    pub async fn release(&self, session: PooledSession<F>) {
        session.finish().await;
    }

    /// Disconnect a session instead of returning it
    pub async fn destroy(&self, session: PooledSession<F>) {
        session.invalidate().await;
    }

    /// Whether a session is still usable
    pub fn validate(&self, session: &F::Session) -> bool {
        session.is_connected()
    }

    /// Make sure `base/dir` exists, serialized across the whole connector
    pub async fn ensure_directory(
        &self,
        session: &mut F::Session,
        base: &str,
        dir: &str,
    ) -> Result<()> {
        ensure_directory(session, base, dir, &self.dir_lock).await
    }

    /// Whether the connector currently reaches its servers
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Record that a server could not be reached
    pub fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!("Connector {} lost its connection", self.name);
        }
    }

    /// Record that a server was reached
    pub fn mark_connected(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            info!("Connector {} reconnected", self.name);
        }
    }

    /// Statistics of every pool
    pub async fn pool_stats(&self) -> Vec<(EndpointAddress, PoolStatsSnapshot)> {
        let pools = self.pools.lock().await;
        pools
            .iter()
            .map(|(endpoint, pool)| (endpoint.clone(), pool.stats().snapshot()))
            .collect()
    }

    /// Log the health of every pool
    pub async fn log_health(&self) {
        let pools = self.pools.lock().await;
        for (endpoint, pool) in pools.iter() {
            pool.stats().log_health(&endpoint.to_string());
        }
    }

    /// Close every pool
    pub async fn close(&self) {
        let pools: Vec<_> = self.pools.lock().await.drain().map(|(_, p)| p).collect();
        for pool in pools {
            pool.close().await;
        }
        info!("Coordinator {} closed", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::error::TransferError;
    use crate::session::{MemoryFileSystem, MemorySessionFactory};

    fn endpoint(path: &str) -> EndpointAddress {
        EndpointAddress::new("mem", 22, "u", path, Credentials::Password("pw".into()))
    }

    fn coordinator(fs: &MemoryFileSystem) -> TransferCoordinator<MemorySessionFactory> {
        TransferCoordinator::new(
            "test",
            Arc::new(MemorySessionFactory::new(fs.clone())),
            PoolConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_acquire_enters_endpoint_directory() {
        let fs = MemoryFileSystem::new();
        fs.add_dir("/data/in");
        let coordinator = coordinator(&fs);

        let session = coordinator
            .acquire(&endpoint("/data/in"), PoolLimit::Unbounded)
            .await
            .unwrap();
        assert_eq!(session.working_directory(), "/data/in");
        coordinator.release(session).await;

        let stats = coordinator.pool_stats().await;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].1.idle_count, 1);
    }

    #[tokio::test]
    async fn test_acquire_missing_directory_releases_session() {
        let fs = MemoryFileSystem::new();
        let coordinator = coordinator(&fs);

        let err = coordinator
            .acquire(&endpoint("/nope"), PoolLimit::Bounded(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NotFound(_)));

        let stats = &coordinator.pool_stats().await[0].1;
        assert_eq!(stats.in_use_count, 0);
    }

    #[tokio::test]
    async fn test_pools_are_per_endpoint() {
        let fs = MemoryFileSystem::new();
        fs.add_dir("/a");
        fs.add_dir("/b");
        let coordinator = coordinator(&fs);

        let a = coordinator.acquire(&endpoint("/a"), PoolLimit::Unbounded).await.unwrap();
        let b = coordinator.acquire(&endpoint("/b"), PoolLimit::Unbounded).await.unwrap();
        coordinator.release(a).await;
        coordinator.release(b).await;

        assert_eq!(coordinator.pool_stats().await.len(), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_marks_disconnected() {
        let fs = MemoryFileSystem::new();
        fs.fail_connects(true);
        let coordinator = coordinator(&fs);

        assert!(coordinator.is_connected());
        assert!(coordinator
            .acquire(&endpoint("/"), PoolLimit::Disabled)
            .await
            .is_err());
        assert!(!coordinator.is_connected());

        fs.fail_connects(false);
        let session = coordinator.acquire(&endpoint("/"), PoolLimit::Disabled).await.unwrap();
        assert!(coordinator.is_connected());
        coordinator.destroy(session).await;
        assert_eq!(fs.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_release_invalidates_broken_session() {
        let fs = MemoryFileSystem::new();
        let coordinator = coordinator(&fs);

        let session = coordinator.acquire(&endpoint("/"), PoolLimit::Unbounded).await.unwrap();
        fs.disconnect_all();
        assert!(!coordinator.validate(&session));
        coordinator.release(session).await;

        let stats = &coordinator.pool_stats().await[0].1;
        assert_eq!(stats.idle_count, 0);
        assert_eq!(stats.total_destroyed, 1);
    }

    #[tokio::test]
    async fn test_close_drains_pools() {
        let fs = MemoryFileSystem::new();
        let coordinator = coordinator(&fs);

        let session = coordinator.acquire(&endpoint("/"), PoolLimit::Unbounded).await.unwrap();
        coordinator.release(session).await;
        coordinator.close().await;

        assert_eq!(fs.open_sessions(), 0);
        assert!(coordinator.pool_stats().await.is_empty());
    }
}
