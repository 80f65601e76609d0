//! Per-endpoint session pool
//!
//! Caches authenticated sessions for one [`EndpointAddress`]. A bounded
//! pool hands out at most `n` sessions at once and makes further borrowers
//! wait up to the acquire timeout; an unbounded pool only caches; a
//! disabled pool connects on every borrow and disconnects on every return.

use super::entry::IdleEntry;
use super::guard::PooledSession;
use super::stats::PoolStats;
use crate::config::{EndpointAddress, PoolConfig, PoolLimit};
use crate::error::{Result, TransferError};
use crate::session::{RemoteFileSession, SessionFactory};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info};

/// Shared state of a pool, referenced by every outstanding guard
pub(crate) struct PoolInner<F: SessionFactory> {
    /// Endpoint all sessions are connected to
    pub(crate) endpoint: EndpointAddress,
    /// Session factory
    factory: Arc<F>,
    /// Sizing rule
    limit: PoolLimit,
    /// Check `is_connected` before lending and on return
    validate: bool,
    /// Idle sessions older than this are discarded
    idle_timeout: Duration,
    /// Idle sessions, oldest first
    idle: Mutex<VecDeque<IdleEntry<F::Session>>>,
    /// Borrow slots of a bounded pool
    permits: Option<Arc<Semaphore>>,
    /// Set once the pool is closed
    closed: AtomicBool,
    /// Statistics
    pub(crate) stats: PoolStats,
}

impl<F: SessionFactory> PoolInner<F> {
    /// Return a borrowed session, keeping it idle when it is still usable
    pub(crate) async fn put_back(&self, session: F::Session, created_at: Instant) {
        self.stats.record_released();

        if !self.limit.is_pooling() || self.closed.load(Ordering::SeqCst) {
            self.destroy(session).await;
            return;
        }
        if self.validate && !session.is_connected() {
            debug!("Returned session for {} is disconnected", self.endpoint);
            self.destroy(session).await;
            return;
        }

        let mut idle = self.idle.lock().await;
        idle.push_back(IdleEntry::new(session, created_at));
        self.stats.record_returned();
        self.stats.set_idle_count(idle.len());
        debug!("Session returned to pool for {}, idle: {}", self.endpoint, idle.len());
    }

    /// Disconnect and drop a session
    pub(crate) async fn destroy(&self, mut session: F::Session) {
        if let Err(e) = session.disconnect().await {
            debug!("Error disconnecting session for {}: {}", self.endpoint, e);
        }
        self.stats.record_destroyed();
    }

    async fn take_idle(&self) -> Option<IdleEntry<F::Session>> {
        let mut idle = self.idle.lock().await;
        let entry = idle.pop_back();
        self.stats.set_idle_count(idle.len());
        entry
    }
}

/// Session pool of one endpoint
///
/// Clones share the sessions, slots and statistics. The acquire timeout
/// belongs to each handle.
pub struct SessionPool<F: SessionFactory> {
    inner: Arc<PoolInner<F>>,
    /// Maximum wait for a slot in a bounded pool
    acquire_timeout: Duration,
}

impl<F: SessionFactory> Clone for SessionPool<F> {
    fn clone(&self) -> Self {
        SessionPool {
            inner: self.inner.clone(),
            acquire_timeout: self.acquire_timeout,
        }
    }
}

impl<F: SessionFactory> std::fmt::Debug for SessionPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("endpoint", &self.inner.endpoint.to_string())
            .field("limit", &self.inner.limit)
            .finish()
    }
}

impl<F: SessionFactory> SessionPool<F> {
    /// Create a pool for `endpoint`
    pub fn new(
        endpoint: EndpointAddress,
        factory: Arc<F>,
        limit: PoolLimit,
        config: &PoolConfig,
    ) -> Self {
        let permits = match limit {
            PoolLimit::Bounded(n) => Some(Arc::new(Semaphore::new(n))),
            _ => None,
        };
        info!("Created session pool for {} (max size: {})", endpoint, limit);

        SessionPool {
            inner: Arc::new(PoolInner {
                endpoint,
                factory,
                limit,
                validate: config.validate_connections,
                idle_timeout: Duration::from_secs(config.idle_timeout),
                idle: Mutex::new(VecDeque::new()),
                permits,
                closed: AtomicBool::new(false),
                stats: PoolStats::new(),
            }),
            acquire_timeout: Duration::from_secs(config.acquire_timeout),
        }
    }

    /// Override the acquire timeout of this handle
    ///
    /// Other clones keep their own timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Maximum wait of [`SessionPool::acquire`] on an exhausted bounded pool
    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Borrow a session, reusing an idle one when possible
    ///
    /// Fails with [`TransferError::Timeout`] when a bounded pool stays
    /// exhausted for the whole acquire timeout.
    pub async fn acquire(&self) -> Result<PooledSession<F>> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(TransferError::Pool(format!(
                "Pool for {} is closed",
                inner.endpoint
            )));
        }

        let permit = match &inner.permits {
            Some(semaphore) => {
                let permit =
                    tokio::time::timeout(self.acquire_timeout, semaphore.clone().acquire_owned())
                        .await
                        .map_err(|_| {
                            TransferError::Timeout(format!(
                                "No session available for {} within {:?}",
                                inner.endpoint, self.acquire_timeout
                            ))
                        })?
                        .map_err(|_| {
                            TransferError::Pool(format!("Pool for {} is closed", inner.endpoint))
                        })?;
                Some(permit)
            }
            None => None,
        };

        while let Some(entry) = inner.take_idle().await {
            if entry.is_stale(inner.idle_timeout) {
                debug!("Discarding stale session for {}", inner.endpoint);
                inner.stats.record_expired();
                inner.destroy(entry.into_session()).await;
                continue;
            }
            if inner.validate && !entry.session.is_connected() {
                debug!("Discarding disconnected session for {}", inner.endpoint);
                inner.stats.record_expired();
                inner.destroy(entry.into_session()).await;
                continue;
            }

            inner.stats.record_acquired();
            let created_at = entry.created_at;
            return Ok(PooledSession::new(
                entry.into_session(),
                created_at,
                permit,
                inner.clone(),
            ));
        }

        let session = inner.factory.connect(&inner.endpoint).await?;
        inner.stats.record_created();
        inner.stats.record_acquired();
        debug!("Created new session for {}", inner.endpoint);

        Ok(PooledSession::new(
            session,
            Instant::now(),
            permit,
            inner.clone(),
        ))
    }

    /// Close the pool and disconnect all idle sessions
    ///
    /// Borrowed sessions are disconnected when they come back.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(semaphore) = &inner.permits {
            semaphore.close();
        }

        let drained: Vec<_> = {
            let mut idle = inner.idle.lock().await;
            let drained = idle.drain(..).collect();
            inner.stats.set_idle_count(0);
            drained
        };
        for entry in drained {
            inner.destroy(entry.into_session()).await;
        }
        info!("Closed session pool for {}", inner.endpoint);
    }

    /// Endpoint of this pool
    pub fn endpoint(&self) -> &EndpointAddress {
        &self.inner.endpoint
    }

    /// Sizing rule of this pool
    pub fn limit(&self) -> PoolLimit {
        self.inner.limit
    }

    /// Whether [`SessionPool::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Get pool statistics
    pub fn stats(&self) -> &PoolStats {
        &self.inner.stats
    }
}
