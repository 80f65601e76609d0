//! RAII guard for borrowed sessions
//!
//! A [`PooledSession`] must end in [`PooledSession::release`] or
//! [`PooledSession::invalidate`]. A guard dropped without either is treated
//! as broken: its session is disconnected in the background and never
//! returned to the idle queue.

use super::session_pool::PoolInner;
use crate::error::TransferError;
use crate::session::SessionFactory;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

/// A session borrowed from a [`SessionPool`](super::SessionPool)
pub struct PooledSession<F: SessionFactory> {
    /// The session (Option to allow taking)
    session: Option<F::Session>,
    /// When the session was created
    created_at: Instant,
    /// Slot in a bounded pool, held for the lifetime of the borrow
    permit: Option<OwnedSemaphorePermit>,
    /// Owning pool
    pool: Arc<PoolInner<F>>,
}

impl<F: SessionFactory> PooledSession<F> {
    pub(crate) fn new(
        session: F::Session,
        created_at: Instant,
        permit: Option<OwnedSemaphorePermit>,
        pool: Arc<PoolInner<F>>,
    ) -> Self {
        PooledSession {
            session: Some(session),
            created_at,
            permit,
            pool,
        }
    }

    /// Return the session to its pool
    ///
    /// The pool validates the session and either keeps it idle or
    /// disconnects it.
    pub async fn release(mut self) {
        if let Some(session) = self.session.take() {
            self.pool.put_back(session, self.created_at).await;
        }
        // permit is dropped with self, after the session is idle again
    }

    /// Disconnect the session instead of returning it
    pub async fn invalidate(mut self) {
        if let Some(session) = self.session.take() {
            self.pool.stats.record_released();
            self.pool.destroy(session).await;
        }
    }

    /// Release a healthy session, invalidate a disconnected one
    pub async fn finish(self) {
        if self.is_connected_session() {
            self.release().await;
        } else {
            self.invalidate().await;
        }
    }

    /// Finish after `error`; a connection failure always ends the session
    pub async fn finish_with_error(self, error: &TransferError) {
        if error.is_connection_failure() {
            debug!(
                "Discarding session for {} after connection failure: {}",
                self.pool.endpoint, error
            );
            self.invalidate().await;
        } else {
            self.finish().await;
        }
    }

    fn is_connected_session(&self) -> bool {
        use crate::session::RemoteFileSession;
        self.session.as_ref().is_some_and(|s| s.is_connected())
    }
}

impl<F: SessionFactory> Deref for PooledSession<F> {
    type Target = F::Session;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref().expect("Session already released")
    }
}

impl<F: SessionFactory> DerefMut for PooledSession<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut().expect("Session already released")
    }
}

impl<F: SessionFactory> fmt::Debug for PooledSession<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSession")
            .field("session", &self.session)
            .field("endpoint", &self.pool.endpoint.to_string())
            .finish()
    }
}

impl<F: SessionFactory> Drop for PooledSession<F> {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.pool.stats.record_released();
        debug!(
            "Session for {} dropped without release, disconnecting",
            self.pool.endpoint
        );

        let pool = self.pool.clone();
        let permit = self.permit.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    pool.destroy(session).await;
                    drop(permit);
                });
            }
            Err(_) => {
                drop(session);
                pool.stats.record_destroyed();
            }
        }
    }
}
