//! In-memory session backend
//!
//! [`MemoryFileSystem`] is a shared remote filesystem living in process
//! memory. Sessions created by [`MemorySessionFactory`] operate on it with
//! the same semantics as SFTP sessions, and the filesystem can inject
//! faults (failed connects, writes, stats, listings and deletes, growing
//! files, dropped connections).

use super::{
    path, FileDescriptor, FileStat, RemoteFileSession, RemoteReader, RemoteWriter,
    SessionFactory, WriteMode,
};
use crate::config::EndpointAddress;
use crate::error::{Result, TransferError};
use crate::helper::epoch_millis;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::SystemTime;
use tokio::io::AsyncWrite;

const DEFAULT_HOME: &str = "/home/courier";

#[derive(Debug, Clone, Default)]
struct MemoryFile {
    data: Vec<u8>,
    /// Seconds since the Unix epoch
    mtime: u64,
    /// Bytes appended every time the file is stat'ed
    growth: usize,
}

#[derive(Debug, Default)]
struct FsState {
    files: BTreeMap<String, MemoryFile>,
    dirs: BTreeSet<String>,
    permissions: HashMap<String, u32>,
    generation: u64,
    connects: usize,
    open_sessions: usize,
    deleted: Vec<String>,
    fail_connects: bool,
    fail_listing: bool,
    fail_deletes: bool,
    write_limit: Option<u64>,
    drop_on_write_limit: bool,
    failing_stats: HashSet<String>,
}

impl FsState {
    fn add_dir_all(&mut self, dir: &str) {
        let dir = path::normalize(dir);
        let mut current = String::new();
        self.dirs.insert("/".to_string());
        for component in dir.split('/').filter(|c| !c.is_empty()) {
            current.push('/');
            current.push_str(component);
            self.dirs.insert(current.clone());
        }
    }
}

fn now_secs() -> u64 {
    epoch_millis(SystemTime::now()) / 1000
}

fn not_connected(op: &'static str, path: &str) -> TransferError {
    TransferError::transfer(
        op,
        path,
        io::Error::new(io::ErrorKind::NotConnected, "session is disconnected"),
    )
}

/// Shared in-memory remote filesystem
#[derive(Debug, Clone)]
pub struct MemoryFileSystem {
    state: Arc<Mutex<FsState>>,
    home: String,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        MemoryFileSystem::with_home(DEFAULT_HOME)
    }
}

impl MemoryFileSystem {
    /// Create an empty filesystem with the default home directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty filesystem whose logins land in `home`
    pub fn with_home(home: &str) -> Self {
        let mut state = FsState::default();
        state.add_dir_all(home);
        MemoryFileSystem {
            state: Arc::new(Mutex::new(state)),
            home: path::normalize(home),
        }
    }

    fn state(&self) -> MutexGuard<'_, FsState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Login home directory
    pub fn home(&self) -> &str {
        &self.home
    }

    /// Create a directory and its parents
    pub fn add_dir(&self, dir: &str) {
        self.state().add_dir_all(dir);
    }

    /// Create or replace a file, creating parent directories
    pub fn add_file(&self, file: &str, content: impl Into<Vec<u8>>) {
        let file = path::normalize(file);
        let mut state = self.state();
        state.add_dir_all(&path::parent(&file));
        state.files.insert(
            file,
            MemoryFile {
                data: content.into(),
                mtime: now_secs(),
                growth: 0,
            },
        );
    }

    /// Content of a file
    pub fn read_file(&self, file: &str) -> Option<Vec<u8>> {
        self.state()
            .files
            .get(&path::normalize(file))
            .map(|f| f.data.clone())
    }

    /// Whether a file exists
    pub fn file_exists(&self, file: &str) -> bool {
        self.state().files.contains_key(&path::normalize(file))
    }

    /// Whether a directory exists
    pub fn dir_exists(&self, dir: &str) -> bool {
        self.state().dirs.contains(&path::normalize(dir))
    }

    /// Sorted names of the files directly inside `dir`
    pub fn files_in(&self, dir: &str) -> Vec<String> {
        let dir = path::normalize(dir);
        self.state()
            .files
            .keys()
            .filter(|f| path::parent(f) == dir)
            .map(|f| path::file_name(f).to_string())
            .collect()
    }

    /// Set the modification time of a file, in seconds since the epoch
    pub fn set_mtime(&self, file: &str, mtime: u64) {
        if let Some(f) = self.state().files.get_mut(&path::normalize(file)) {
            f.mtime = mtime;
        }
    }

    /// Append `bytes` to the file every time it is stat'ed
    pub fn grow_on_stat(&self, file: &str, bytes: usize) {
        if let Some(f) = self.state().files.get_mut(&path::normalize(file)) {
            f.growth = bytes;
        }
    }

    /// Make every `stat` of `file` fail
    pub fn fail_stat(&self, file: &str) {
        self.state().failing_stats.insert(path::normalize(file));
    }

    /// Make writes fail once a writer has written `limit` bytes
    pub fn fail_writes_after(&self, limit: Option<u64>) {
        let mut state = self.state();
        state.write_limit = limit;
        state.drop_on_write_limit = false;
    }

    /// Make writes fail with a broken pipe once a writer has written `limit`
    /// bytes, as if the connection dropped mid-transfer
    pub fn drop_connection_after(&self, limit: u64) {
        let mut state = self.state();
        state.write_limit = Some(limit);
        state.drop_on_write_limit = true;
    }

    /// Make new connections fail
    pub fn fail_connects(&self, fail: bool) {
        self.state().fail_connects = fail;
    }

    /// Make listings fail with a dropped connection
    pub fn fail_listing(&self, fail: bool) {
        self.state().fail_listing = fail;
    }

    /// Make deletes fail
    pub fn fail_deletes(&self, fail: bool) {
        self.state().fail_deletes = fail;
    }

    /// Drop the connection of every session opened so far
    pub fn disconnect_all(&self) {
        self.state().generation += 1;
    }

    /// Number of successful connects
    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    /// Number of sessions not yet disconnected or dropped
    pub fn open_sessions(&self) -> usize {
        self.state().open_sessions
    }

    /// Paths deleted through sessions, in order
    pub fn deleted(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    /// Permissions last set with `chmod`
    pub fn permissions(&self, file: &str) -> Option<u32> {
        self.state().permissions.get(&path::normalize(file)).copied()
    }
}

/// Session on a [`MemoryFileSystem`]
#[derive(Debug)]
pub struct MemorySession {
    fs: MemoryFileSystem,
    host: String,
    cwd: String,
    generation: u64,
    open: bool,
}

impl MemorySession {
    fn resolve(&self, p: &str) -> String {
        path::resolve(&self.cwd, self.fs.home(), p)
    }

    fn check(&self, op: &'static str, p: &str) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(not_connected(op, p))
        }
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            let mut state = self.fs.state();
            state.open_sessions = state.open_sessions.saturating_sub(1);
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl RemoteFileSession for MemorySession {
    fn host(&self) -> &str {
        &self.host
    }

    fn home(&self) -> &str {
        self.fs.home()
    }

    fn working_directory(&self) -> &str {
        &self.cwd
    }

    fn is_connected(&self) -> bool {
        self.open && self.fs.state().generation == self.generation
    }

    async fn change_directory(&mut self, p: &str) -> Result<()> {
        self.check("cd", p)?;
        let target = self.resolve(p);
        if !self.fs.state().dirs.contains(&target) {
            return Err(TransferError::NotFound(target));
        }
        self.cwd = target;
        Ok(())
    }

    async fn list(
        &mut self,
        p: &str,
        include_files: bool,
        include_dirs: bool,
    ) -> Result<Vec<FileDescriptor>> {
        self.check("list", p)?;
        let dir = self.resolve(p);
        let state = self.fs.state();
        if state.fail_listing {
            return Err(TransferError::transfer(
                "list",
                dir,
                io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"),
            ));
        }
        if !state.dirs.contains(&dir) {
            return Err(TransferError::NotFound(dir));
        }

        let mut entries = Vec::new();
        if include_dirs {
            entries.extend(
                state
                    .dirs
                    .iter()
                    .filter(|d| d.as_str() != dir && path::parent(d) == dir)
                    .map(|d| FileDescriptor {
                        filename: path::file_name(d).to_string(),
                        size: 0,
                        mtime: 0,
                        is_dir: true,
                    }),
            );
        }
        if include_files {
            entries.extend(
                state
                    .files
                    .iter()
                    .filter(|(f, _)| path::parent(f) == dir)
                    .map(|(f, file)| FileDescriptor {
                        filename: path::file_name(f).to_string(),
                        size: file.data.len() as u64,
                        mtime: file.mtime,
                        is_dir: false,
                    }),
            );
        }
        Ok(entries)
    }

    async fn get(&mut self, filename: &str) -> Result<RemoteReader> {
        self.check("get", filename)?;
        let target = self.resolve(filename);
        let data = self
            .fs
            .state()
            .files
            .get(&target)
            .map(|f| f.data.clone())
            .ok_or(TransferError::NotFound(target))?;
        Ok(Box::new(io::Cursor::new(data)))
    }

    async fn open_write(&mut self, filename: &str, mode: WriteMode) -> Result<RemoteWriter> {
        self.check("put", filename)?;
        let target = self.resolve(filename);
        let mut state = self.fs.state();
        if !state.dirs.contains(&path::parent(&target)) {
            return Err(TransferError::NotFound(path::parent(&target)));
        }
        if state.dirs.contains(&target) {
            return Err(TransferError::transfer_msg("put", target, "is a directory"));
        }

        let file = state.files.entry(target.clone()).or_default();
        if mode == WriteMode::Overwrite {
            file.data.clear();
        }
        file.mtime = now_secs();
        let limit = state.write_limit;
        let failure = if state.drop_on_write_limit {
            io::ErrorKind::BrokenPipe
        } else {
            io::ErrorKind::Other
        };

        Ok(Box::new(MemoryWriter {
            fs: self.fs.clone(),
            path: target,
            written: 0,
            limit,
            failure,
        }))
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        self.check("rename", from)?;
        let source = self.resolve(from);
        let target = self.resolve(to);
        let mut state = self.fs.state();

        if !state.files.contains_key(&source) {
            return Err(TransferError::NotFound(source));
        }
        if state.files.contains_key(&target) || state.dirs.contains(&target) {
            return Err(TransferError::transfer(
                "rename",
                target,
                io::Error::new(io::ErrorKind::AlreadyExists, "target exists"),
            ));
        }
        if !state.dirs.contains(&path::parent(&target)) {
            return Err(TransferError::NotFound(path::parent(&target)));
        }

        if let Some(file) = state.files.remove(&source) {
            state.files.insert(target, file);
        }
        Ok(())
    }

    async fn delete(&mut self, filename: &str) -> Result<()> {
        self.check("delete", filename)?;
        let target = self.resolve(filename);
        let mut state = self.fs.state();
        if state.fail_deletes {
            return Err(TransferError::transfer(
                "delete",
                target,
                io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
            ));
        }
        if state.files.remove(&target).is_none() {
            return Err(TransferError::NotFound(target));
        }
        state.deleted.push(target);
        Ok(())
    }

    async fn mkdir(&mut self, p: &str) -> Result<()> {
        self.check("mkdir", p)?;
        let target = self.resolve(p);
        let mut state = self.fs.state();
        if state.dirs.contains(&target) || state.files.contains_key(&target) {
            return Err(TransferError::transfer(
                "mkdir",
                target,
                io::Error::new(io::ErrorKind::AlreadyExists, "already exists"),
            ));
        }
        if !state.dirs.contains(&path::parent(&target)) {
            return Err(TransferError::NotFound(path::parent(&target)));
        }
        state.dirs.insert(target);
        Ok(())
    }

    async fn rmdir(&mut self, p: &str) -> Result<()> {
        self.check("rmdir", p)?;
        let target = self.resolve(p);
        let mut state = self.fs.state();
        if !state.dirs.contains(&target) {
            return Err(TransferError::NotFound(target));
        }
        let occupied = state.files.keys().any(|f| path::parent(f) == target)
            || state
                .dirs
                .iter()
                .any(|d| *d != target && path::parent(d) == target);
        if occupied {
            return Err(TransferError::transfer_msg(
                "rmdir",
                target,
                "directory not empty",
            ));
        }
        state.dirs.remove(&target);
        Ok(())
    }

    async fn chmod(&mut self, p: &str, permissions: u32) -> Result<()> {
        self.check("chmod", p)?;
        let target = self.resolve(p);
        let mut state = self.fs.state();
        if !state.files.contains_key(&target) && !state.dirs.contains(&target) {
            return Err(TransferError::NotFound(target));
        }
        state.permissions.insert(target, permissions);
        Ok(())
    }

    async fn stat(&mut self, filename: &str) -> Result<FileStat> {
        self.check("stat", filename)?;
        let target = self.resolve(filename);
        let mut state = self.fs.state();
        if state.failing_stats.contains(&target) {
            return Err(TransferError::transfer_msg(
                "stat",
                target,
                "injected stat failure",
            ));
        }
        if state.dirs.contains(&target) {
            return Ok(FileStat { size: 0, mtime: 0 });
        }
        let file = state
            .files
            .get_mut(&target)
            .ok_or_else(|| TransferError::NotFound(target.clone()))?;
        let stat = FileStat {
            size: file.data.len() as u64,
            mtime: file.mtime,
        };
        if file.growth > 0 {
            let growth = file.growth;
            file.data.extend(std::iter::repeat(b'.').take(growth));
        }
        Ok(stat)
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.close();
        Ok(())
    }
}

/// Writer appending straight into a [`MemoryFileSystem`] file
struct MemoryWriter {
    fs: MemoryFileSystem,
    path: String,
    written: u64,
    limit: Option<u64>,
    failure: io::ErrorKind,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let allowed = match self.limit {
            Some(limit) if self.written >= limit => {
                return Poll::Ready(Err(io::Error::new(
                    self.failure,
                    "injected write failure",
                )))
            }
            Some(limit) => buf.len().min((limit - self.written) as usize),
            None => buf.len(),
        };

        {
            let mut state = self.fs.state();
            let file = state.files.entry(self.path.clone()).or_default();
            file.data.extend_from_slice(&buf[..allowed]);
            file.mtime = now_secs();
        }
        self.written += allowed as u64;
        Poll::Ready(Ok(allowed))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Creates [`MemorySession`]s on a shared filesystem
#[derive(Debug, Clone, Default)]
pub struct MemorySessionFactory {
    fs: MemoryFileSystem,
}

impl MemorySessionFactory {
    /// Create a factory over `fs`
    pub fn new(fs: MemoryFileSystem) -> Self {
        MemorySessionFactory { fs }
    }

    /// The shared filesystem
    pub fn filesystem(&self) -> &MemoryFileSystem {
        &self.fs
    }
}

#[async_trait]
impl SessionFactory for MemorySessionFactory {
    type Session = MemorySession;

    async fn connect(&self, endpoint: &EndpointAddress) -> Result<MemorySession> {
        let generation = {
            let mut state = self.fs.state();
            if state.fail_connects {
                return Err(TransferError::Connection(format!(
                    "Connection refused by {}",
                    endpoint.socket_addr()
                )));
            }
            state.connects += 1;
            state.open_sessions += 1;
            state.generation
        };

        Ok(MemorySession {
            fs: self.fs.clone(),
            host: endpoint.host().to_string(),
            cwd: self.fs.home().to_string(),
            generation,
            open: true,
        })
    }
}
