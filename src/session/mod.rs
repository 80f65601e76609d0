//! Remote file session module
//!
//! A session wraps one authenticated connection to a remote file server and
//! exposes directory navigation, listing and file operations. Sessions keep
//! a current working directory, so every session must be driven by a single
//! task at a time; the pool hands them out through `&mut` guards.
//!
//! Two backends implement [`RemoteFileSession`]:
//!
//! - [`SftpSession`] (feature `sftp`): russh client with the SFTP subsystem
//! - [`MemorySession`]: an in-process filesystem with fault injection

pub mod auth;
mod directory;
mod memory;
pub mod path;
#[cfg(feature = "sftp")]
mod sftp;

pub use auth::{parse_auth_methods, AuthMethod};
pub use directory::{delete_recursively, ensure_directory};
pub use memory::{MemoryFileSystem, MemorySession, MemorySessionFactory};
#[cfg(feature = "sftp")]
pub use sftp::{SftpSession, SftpSessionFactory};

use crate::config::EndpointAddress;
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use std::fmt::Debug;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Boxed read half of a remote file
pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed write half of a remote file
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// How a write treats an existing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Truncate and replace
    Overwrite,
    /// Append to the end
    Append,
}

/// Attributes snapshot of a listed remote entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Entry name, without directory
    pub filename: String,
    /// Size in bytes
    pub size: u64,
    /// Modification time, seconds since the Unix epoch
    pub mtime: u64,
    /// Whether the entry is a directory
    pub is_dir: bool,
}

/// Result of a `stat` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Size in bytes
    pub size: u64,
    /// Modification time, seconds since the Unix epoch
    pub mtime: u64,
}

impl FileStat {
    /// Modification time in milliseconds since the Unix epoch
    pub fn mtime_millis(&self) -> u64 {
        self.mtime.saturating_mul(1000)
    }
}

/// One authenticated connection to a remote file server
///
/// Relative paths resolve against the session's working directory. Paths
/// starting with `/~` resolve against the login home directory.
#[async_trait]
pub trait RemoteFileSession: Send + Sync + Debug {
    /// Remote host this session is connected to
    fn host(&self) -> &str;

    /// Login home directory
    fn home(&self) -> &str;

    /// Current working directory
    fn working_directory(&self) -> &str;

    /// Whether the connection and its channel are still open
    fn is_connected(&self) -> bool;

    /// Change the working directory
    ///
    /// Fails with [`TransferError::NotFound`] when the directory does not exist.
    async fn change_directory(&mut self, path: &str) -> Result<()>;

    /// List a directory, skipping `.` and `..`
    async fn list(
        &mut self,
        path: &str,
        include_files: bool,
        include_dirs: bool,
    ) -> Result<Vec<FileDescriptor>>;

    /// Open a remote file for reading
    async fn get(&mut self, filename: &str) -> Result<RemoteReader>;

    /// Open a remote file for writing
    async fn open_write(&mut self, filename: &str, mode: WriteMode) -> Result<RemoteWriter>;

    /// Rename (move) a remote file
    async fn rename(&mut self, from: &str, to: &str) -> Result<()>;

    /// Delete a remote file
    async fn delete(&mut self, filename: &str) -> Result<()>;

    /// Create a directory
    async fn mkdir(&mut self, path: &str) -> Result<()>;

    /// Remove an empty directory
    async fn rmdir(&mut self, path: &str) -> Result<()>;

    /// Change permissions
    async fn chmod(&mut self, path: &str, permissions: u32) -> Result<()>;

    /// Size and modification time of a file
    async fn stat(&mut self, filename: &str) -> Result<FileStat>;

    /// Close the channel and the connection
    async fn disconnect(&mut self) -> Result<()>;

    /// Resolve `/~` against the home directory; other paths are returned as-is
    fn absolute_path(&self, path: &str) -> String {
        path::expand_home(self.home(), path)
    }

    /// Copy `source` into a remote file, returning the number of bytes written
    async fn put(
        &mut self,
        filename: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
        mode: WriteMode,
    ) -> Result<u64> {
        let mut writer = self.open_write(filename, mode).await?;
        let written = tokio::io::copy(source, &mut writer)
            .await
            .map_err(|e| TransferError::transfer("put", filename, e))?;
        writer
            .shutdown()
            .await
            .map_err(|e| TransferError::transfer("close", filename, e))?;
        Ok(written)
    }

    /// Names of the regular files in `path`
    async fn list_files(&mut self, path: &str) -> Result<Vec<String>> {
        let entries = self.list(path, true, false).await?;
        Ok(entries.into_iter().map(|e| e.filename).collect())
    }

    /// Names of the directories in `path`
    async fn list_directories(&mut self, path: &str) -> Result<Vec<String>> {
        let entries = self.list(path, false, true).await?;
        Ok(entries.into_iter().map(|e| e.filename).collect())
    }

    /// Size of a file in bytes
    async fn size(&mut self, filename: &str) -> Result<u64> {
        Ok(self.stat(filename).await?.size)
    }

    /// Last modification time in milliseconds since the Unix epoch
    async fn last_modified(&mut self, filename: &str) -> Result<u64> {
        Ok(self.stat(filename).await?.mtime_millis())
    }
}

/// Creates connected, logged-in sessions for an endpoint
#[async_trait]
pub trait SessionFactory: Debug + Send + Sync + 'static {
    /// The session type produced by this factory
    type Session: RemoteFileSession + 'static;

    /// Connect and authenticate against `endpoint`
    async fn connect(&self, endpoint: &EndpointAddress) -> Result<Self::Session>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stat_mtime_millis() {
        let stat = FileStat {
            size: 10,
            mtime: 1_700_000_000,
        };
        assert_eq!(stat.mtime_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_write_mode_eq() {
        assert_eq!(WriteMode::Overwrite, WriteMode::Overwrite);
        assert_ne!(WriteMode::Overwrite, WriteMode::Append);
    }
}
