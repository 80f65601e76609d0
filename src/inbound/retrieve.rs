//! Retrieval of one inbound file
//!
//! The remote file is optionally moved into the inbound staging directory
//! first, so a file being read can be told apart from one still pending.
//! The read stream is then wrapped in an [`InboundStream`] whose close
//! action deletes or keeps the remote file and releases the session. With
//! an archive configured, the remote content is first copied locally and
//! the consumer reads that copy.

use super::archive;
use super::lock::FileLockGuard;
use super::stream::{InboundStream, OnClose, RemoteCleanup};
use crate::config::{ArchivePolicy, EndpointAddress, TransferPolicy};
use crate::coordinator::{TransferAction, TransferCoordinator};
use crate::error::Result;
use crate::helper::with_timestamp_suffix;
use crate::session::{path, FileDescriptor, RemoteFileSession, RemoteReader, SessionFactory};
use chrono::Local;
use std::fmt;
use std::path::PathBuf;
use tokio::io::AsyncRead;
use tracing::debug;

/// A retrieved file, ready to be read
pub struct InboundFile<F: SessionFactory> {
    /// Content stream; closing it finishes the transfer
    pub stream: InboundStream<F>,
    /// Name the file currently has on the server
    pub filename: String,
    /// Name the file had when it was listed
    pub original_filename: String,
    /// Remote path the stream reads from
    pub remote_path: String,
    /// Listed size in bytes
    pub size: u64,
    lock: Option<FileLockGuard>,
}

impl<F: SessionFactory> InboundFile<F> {
    /// Keep `lock` until this file is dropped
    pub fn with_lock(mut self, lock: FileLockGuard) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Consumer view of this file
    pub fn delivery(&mut self) -> Delivery<'_> {
        Delivery {
            filename: &self.filename,
            original_filename: &self.original_filename,
            size: self.size,
            reader: &mut self.stream,
        }
    }
}

impl<F: SessionFactory> fmt::Debug for InboundFile<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundFile")
            .field("filename", &self.filename)
            .field("original_filename", &self.original_filename)
            .field("remote_path", &self.remote_path)
            .field("size", &self.size)
            .field("locked", &self.lock.is_some())
            .finish()
    }
}

/// What a consumer receives
pub struct Delivery<'a> {
    /// Current file name
    pub filename: &'a str,
    /// File name before staging
    pub original_filename: &'a str,
    /// Listed size in bytes
    pub size: u64,
    /// File content
    pub reader: &'a mut (dyn AsyncRead + Send + Unpin),
}

impl fmt::Debug for Delivery<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("filename", &self.filename)
            .field("original_filename", &self.original_filename)
            .field("size", &self.size)
            .finish()
    }
}

/// Open `file`, listed in the directory of `endpoint`, for reading
///
/// The session borrowed here is owned by the returned stream until it is
/// closed. On error it is released before returning.
pub async fn retrieve<F: SessionFactory>(
    coordinator: &TransferCoordinator<F>,
    endpoint: &EndpointAddress,
    policy: &TransferPolicy,
    file: &FileDescriptor,
) -> Result<InboundFile<F>> {
    let mut session = coordinator.acquire(endpoint, policy.max_pool_size).await?;

    let (remote_path, filename, mut reader) =
        match open_remote(coordinator, &mut session, policy, file).await {
            Ok(opened) => opened,
            Err(e) => {
                if e.is_connection_failure() {
                    coordinator.mark_disconnected();
                }
                session.finish_with_error(&e).await;
                return Err(e);
            }
        };

    let cleanup = RemoteCleanup::new(
        session,
        remote_path.clone(),
        policy.auto_delete,
        coordinator.notifier().clone(),
    );

    let stream = match &policy.archive {
        None => InboundStream::new(filename.clone(), reader, OnClose::Remote(cleanup), true),
        Some(archive) => match stage_archive_copy(&mut reader, archive, &filename).await {
            Ok((staged, local)) => {
                drop(reader);
                let on_close = OnClose::Archive {
                    staged,
                    archive_dir: archive.dir.clone(),
                    remote: cleanup,
                };
                InboundStream::new(filename.clone(), local, on_close, true)
            }
            Err(e) => {
                drop(reader);
                cleanup.abandon(e.is_connection_failure()).await;
                return Err(e);
            }
        },
    };

    Ok(InboundFile {
        stream,
        filename,
        original_filename: file.filename.clone(),
        remote_path,
        size: file.size,
        lock: None,
    })
}

/// Stage the remote file if configured and open it
async fn open_remote<F: SessionFactory>(
    coordinator: &TransferCoordinator<F>,
    session: &mut F::Session,
    policy: &TransferPolicy,
    file: &FileDescriptor,
) -> Result<(String, String, RemoteReader)> {
    let dir = session.working_directory().to_string();
    let mut remote_path = path::join(&dir, &file.filename);
    let mut filename = file.filename.clone();

    if let Some(temp_dir) = &policy.temp_dir_inbound {
        coordinator.ensure_directory(session, &dir, temp_dir).await?;
        if policy.use_temp_file_timestamp_suffix {
            filename = with_timestamp_suffix(&file.filename, Local::now());
        }
        let staged = path::join(
            &session.absolute_path(&path::join(&dir, temp_dir)),
            &filename,
        );
        session.rename(&remote_path, &staged).await?;
        coordinator
            .notifier()
            .notify(TransferAction::Rename, staged.as_str(), None);
        debug!("Staged {} as {}", remote_path, staged);
        remote_path = staged;
    }

    let reader = session.get(&remote_path).await?;
    coordinator
        .notifier()
        .notify(TransferAction::Get, remote_path.as_str(), Some(file.size));
    Ok((remote_path, filename, reader))
}

/// Copy into temp-receiving, move to temp-sending, open the local copy
async fn stage_archive_copy(
    reader: &mut RemoteReader,
    archive: &ArchivePolicy,
    filename: &str,
) -> Result<(PathBuf, RemoteReader)> {
    let received = archive::receive(reader, &archive.temp_receiving_dir, filename).await?;
    let staged = archive::move_into(&received, &archive.temp_sending_dir).await?;
    let local = tokio::fs::File::open(&staged).await?;
    Ok((staged, Box::new(local)))
}
