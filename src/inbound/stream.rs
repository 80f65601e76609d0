//! Inbound stream lifecycle
//!
//! An [`InboundStream`] is the byte stream handed to a consumer. Closing it
//! runs its [`OnClose`] action exactly once, whoever closes it and however
//! often. The action decides what happens to the remote file and always
//! gives the borrowed session back to its pool.

use super::archive;
use crate::coordinator::{TransferAction, TransferNotifier};
use crate::error::{is_connection_kind, Result, TransferError};
use crate::pool::PooledSession;
use crate::session::{RemoteFileSession, RemoteReader, SessionFactory};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, info, warn};

/// Remote side of the close action: optional delete, then session release
pub struct RemoteCleanup<F: SessionFactory> {
    session: PooledSession<F>,
    path: String,
    auto_delete: bool,
    notifier: TransferNotifier,
}

impl<F: SessionFactory> RemoteCleanup<F> {
    /// Clean up `path` through `session` once the stream is done
    pub fn new(
        session: PooledSession<F>,
        path: impl Into<String>,
        auto_delete: bool,
        notifier: TransferNotifier,
    ) -> Self {
        RemoteCleanup {
            session,
            path: path.into(),
            auto_delete,
            notifier,
        }
    }

    /// Remote path of the file being read
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Keep the remote file and release the session, discarding it when
    /// the connection is `broken`
    pub(crate) async fn abandon(self, broken: bool) {
        self.run(true, broken).await;
    }

    async fn run(self, error: bool, broken: bool) {
        let RemoteCleanup {
            mut session,
            path,
            auto_delete,
            notifier,
        } = self;

        if broken {
            warn!("Connection lost while reading {}, keeping it", path);
            session.invalidate().await;
            return;
        }

        if error {
            debug!("Keeping {} after a processing error", path);
        } else if auto_delete {
            match session.delete(&path).await {
                Ok(()) => {
                    notifier.notify(TransferAction::Delete, path.as_str(), None);
                    debug!("Deleted {}", path);
                }
                Err(e) => {
                    warn!("Failed to delete {}: {}", path, e);
                    session.finish_with_error(&e).await;
                    return;
                }
            }
        }

        session.finish().await;
    }
}

impl<F: SessionFactory> fmt::Debug for RemoteCleanup<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCleanup")
            .field("path", &self.path)
            .field("auto_delete", &self.auto_delete)
            .finish()
    }
}

/// What closing an [`InboundStream`] does
#[derive(Debug)]
pub enum OnClose<F: SessionFactory> {
    /// Delete the remote file if requested and release the session
    Remote(RemoteCleanup<F>),
    /// Move the local archive copy into the archive, then clean up remotely
    Archive {
        /// Complete local copy waiting in the temp-sending directory
        staged: PathBuf,
        /// Final archive directory
        archive_dir: PathBuf,
        /// Remote cleanup run afterwards
        remote: RemoteCleanup<F>,
    },
}

impl<F: SessionFactory> OnClose<F> {
    async fn run(self, error: bool, broken: bool) {
        match self {
            OnClose::Remote(remote) => remote.run(error, broken).await,
            OnClose::Archive {
                staged,
                archive_dir,
                remote,
            } => {
                let mut error = error || broken;
                if error {
                    debug!("Skipping archive of {} after a processing error", staged.display());
                } else {
                    match archive::move_into(&staged, &archive_dir).await {
                        Ok(target) => info!("Archived {} to {}", remote.path(), target.display()),
                        Err(e) => {
                            warn!("Failed to archive {}: {}", staged.display(), e);
                            // keep the remote file so nothing is lost
                            error = true;
                        }
                    }
                }
                remote.run(error, broken).await;
            }
        }
    }
}

/// Byte stream of one inbound file
///
/// States: open, then closed exactly once. Reading after close fails.
pub struct InboundStream<F: SessionFactory> {
    name: String,
    reader: Mutex<Option<RemoteReader>>,
    closed: AtomicBool,
    post_processed: AtomicBool,
    error: AtomicBool,
    broken: AtomicBool,
    post_process_on_close: bool,
    on_close: tokio::sync::Mutex<Option<Box<OnClose<F>>>>,
}

impl<F: SessionFactory> InboundStream<F> {
    /// Wrap `reader`; `on_close` runs on close when `post_process_on_close`
    /// is set, otherwise on an explicit [`InboundStream::post_process`]
    pub fn new(
        name: impl Into<String>,
        reader: RemoteReader,
        on_close: OnClose<F>,
        post_process_on_close: bool,
    ) -> Self {
        InboundStream {
            name: name.into(),
            reader: Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
            post_processed: AtomicBool::new(false),
            error: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            post_process_on_close,
            on_close: tokio::sync::Mutex::new(Some(Box::new(on_close))),
        }
    }

    fn reader(&self) -> MutexGuard<'_, Option<RemoteReader>> {
        self.reader.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Name of the file being read
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flag the stream as failed; close keeps the remote file
    pub fn mark_error_occurred(&self) {
        self.error.store(true, Ordering::SeqCst);
    }

    /// Whether [`InboundStream::mark_error_occurred`] was called
    pub fn error_occurred(&self) -> bool {
        self.error.load(Ordering::SeqCst)
    }

    /// Whether a read failed because the connection dropped
    ///
    /// Such a stream keeps the remote file and discards its session on
    /// close.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// Whether the stream has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether the close action has run
    pub fn is_post_processed(&self) -> bool {
        self.post_processed.load(Ordering::SeqCst)
    }

    /// Close the stream
    ///
    /// Only the first call does anything; later and concurrent calls return
    /// immediately.
    pub async fn close(&self) -> Result<()> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let reader = self.reader().take();
        drop(reader);
        debug!("Closed inbound stream {}", self.name);

        if self.post_process_on_close {
            self.post_process().await;
        }
        Ok(())
    }

    /// Run the close action, at most once
    pub async fn post_process(&self) {
        if self
            .post_processed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let action = self.on_close.lock().await.take();
        if let Some(action) = action {
            action.run(self.error_occurred(), self.is_broken()).await;
        }
    }
}

impl<F: SessionFactory> AsyncRead for InboundStream<F> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut reader = self.reader();
        match reader.as_mut() {
            Some(reader) => {
                let poll = Pin::new(reader).poll_read(cx, buf);
                if let Poll::Ready(Err(e)) = &poll {
                    if is_connection_kind(e.kind()) {
                        self.broken.store(true, Ordering::SeqCst);
                    }
                }
                poll
            }
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::Other,
                TransferError::Validation(format!("stream {} is closed", self.name)),
            ))),
        }
    }
}

impl<F: SessionFactory> fmt::Debug for InboundStream<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundStream")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .field("post_processed", &self.is_post_processed())
            .field("error", &self.error_occurred())
            .field("broken", &self.is_broken())
            .finish()
    }
}
