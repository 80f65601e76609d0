//! SFTP session backend
//!
//! Sessions are SSH connections made with `russh` carrying one SFTP
//! subsystem channel driven by `russh-sftp`. Server host keys are accepted
//! without verification; the connector has always run with strict host key
//! checking disabled.

use super::{
    parse_auth_methods, path, AuthMethod, FileDescriptor, FileStat, RemoteFileSession,
    RemoteReader, RemoteWriter, SessionFactory, WriteMode,
};
use crate::config::{ConnectorConfig, Credentials, EndpointAddress, TcpConfig};
use crate::error::{Result, TransferError};
use crate::transport::{AddrMaybeCached, TcpTransport};
use async_trait::async_trait;
use russh::client;
use russh::client::KeyboardInteractiveAuthResponse;
use russh::keys::{load_secret_key, ssh_key, PrivateKeyWithHashAlg};
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::SftpSession as SftpChannel;
use russh_sftp::protocol::{FileAttributes, OpenFlags, StatusCode};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncSeekExt;
use tracing::{debug, info, warn};

/// Methods tried when no preferred order is configured
const DEFAULT_AUTH_METHODS: [AuthMethod; 3] = [
    AuthMethod::PublicKey,
    AuthMethod::KeyboardInteractive,
    AuthMethod::Password,
];

/// SSH client handler accepting every server key
#[derive(Debug)]
pub struct AcceptingHandler {
    host: String,
}

impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        debug!(
            host = %self.host,
            algorithm = %server_public_key.algorithm(),
            "Accepting server host key"
        );
        Ok(true)
    }
}

fn ssh_error(what: &str, endpoint: &EndpointAddress, e: russh::Error) -> TransferError {
    TransferError::Connection(format!("SSH {} {}: {}", what, endpoint.socket_addr(), e))
}

fn sftp_error(op: &'static str, path: &str, e: SftpError) -> TransferError {
    match &e {
        SftpError::Status(status) if status.status_code == StatusCode::NoSuchFile => {
            TransferError::NotFound(path.to_string())
        }
        SftpError::Status(status)
            if matches!(
                status.status_code,
                StatusCode::NoConnection | StatusCode::ConnectionLost
            ) =>
        {
            TransferError::transfer(
                op,
                path,
                io::Error::new(io::ErrorKind::ConnectionAborted, e.to_string()),
            )
        }
        SftpError::IO(_) | SftpError::Timeout => TransferError::transfer(
            op,
            path,
            io::Error::new(io::ErrorKind::BrokenPipe, e.to_string()),
        ),
        _ => TransferError::transfer_msg(op, path, e),
    }
}

/// Creates [`SftpSession`]s
pub struct SftpSessionFactory {
    transport: TcpTransport,
    auth_methods: Vec<AuthMethod>,
    ssh_config: Arc<client::Config>,
    addrs: Mutex<HashMap<String, AddrMaybeCached>>,
}

impl fmt::Debug for SftpSessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SftpSessionFactory")
            .field("transport", &self.transport)
            .field("auth_methods", &self.auth_methods)
            .finish()
    }
}

impl SftpSessionFactory {
    /// Create a factory
    ///
    /// An empty `auth_methods` list selects publickey, keyboard-interactive
    /// and password, in that order.
    pub fn new(tcp: &TcpConfig, connection_timeout: Duration, auth_methods: Vec<AuthMethod>) -> Self {
        let auth_methods = if auth_methods.is_empty() {
            DEFAULT_AUTH_METHODS.to_vec()
        } else {
            auth_methods
        };

        SftpSessionFactory {
            transport: TcpTransport::from_config(tcp, connection_timeout),
            auth_methods,
            ssh_config: Arc::new(client::Config::default()),
            addrs: Mutex::new(HashMap::new()),
        }
    }

    /// Create a factory from the connector settings
    pub fn from_config(config: &ConnectorConfig) -> Result<Self> {
        let auth_methods = match &config.preferred_auth_methods {
            Some(list) => parse_auth_methods(list)?,
            None => Vec::new(),
        };
        Ok(Self::new(
            &config.tcp,
            Duration::from_secs(config.connection_timeout),
            auth_methods,
        ))
    }

    fn addr_for(&self, endpoint: &EndpointAddress) -> AddrMaybeCached {
        let mut addrs = self.addrs.lock().unwrap_or_else(|e| e.into_inner());
        addrs
            .entry(endpoint.socket_addr())
            .or_insert_with(|| AddrMaybeCached::from(endpoint))
            .clone()
    }

    async fn authenticate(
        &self,
        handle: &mut client::Handle<AcceptingHandler>,
        endpoint: &EndpointAddress,
    ) -> Result<()> {
        let user = endpoint.user();

        for method in &self.auth_methods {
            let accepted = match (method, endpoint.credentials()) {
                (AuthMethod::PublicKey, Credentials::Identity { file, passphrase }) => {
                    let key = load_secret_key(file, passphrase.as_deref()).map_err(|e| {
                        TransferError::Connection(format!(
                            "Failed to load identity file {}: {}",
                            file.display(),
                            e
                        ))
                    })?;
                    let hash_alg = handle
                        .best_supported_rsa_hash()
                        .await
                        .map_err(|e| ssh_error("negotiate hash algorithm", endpoint, e))?
                        .flatten();
                    handle
                        .authenticate_publickey(
                            user,
                            PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                        )
                        .await
                        .map_err(|e| ssh_error("authenticate", endpoint, e))?
                        .success()
                }
                (AuthMethod::Password, Credentials::Password(password)) => handle
                    .authenticate_password(user, password)
                    .await
                    .map_err(|e| ssh_error("authenticate", endpoint, e))?
                    .success(),
                (AuthMethod::KeyboardInteractive, Credentials::Password(password)) => {
                    keyboard_interactive(handle, endpoint, password).await?
                }
                (AuthMethod::GssapiWithMic, _) => {
                    debug!("gssapi-with-mic is not supported, skipping");
                    false
                }
                _ => false,
            };

            if accepted {
                debug!(endpoint = %endpoint, method = %method, "Authenticated");
                return Ok(());
            }
        }

        Err(TransferError::Connection(format!(
            "Authentication failed for {}@{} (tried: {})",
            user,
            endpoint.socket_addr(),
            self.auth_methods
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }
}

/// Answer every keyboard-interactive prompt with the password
async fn keyboard_interactive(
    handle: &mut client::Handle<AcceptingHandler>,
    endpoint: &EndpointAddress,
    password: &str,
) -> Result<bool> {
    let mut response = handle
        .authenticate_keyboard_interactive_start(endpoint.user(), None::<String>)
        .await
        .map_err(|e| ssh_error("authenticate", endpoint, e))?;

    loop {
        match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(true),
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                let answers = prompts.iter().map(|_| password.to_string()).collect();
                response = handle
                    .authenticate_keyboard_interactive_respond(answers)
                    .await
                    .map_err(|e| ssh_error("authenticate", endpoint, e))?;
            }
            _ => return Ok(false),
        }
    }
}

#[async_trait]
impl SessionFactory for SftpSessionFactory {
    type Session = SftpSession;

    async fn connect(&self, endpoint: &EndpointAddress) -> Result<SftpSession> {
        let addr = self.addr_for(endpoint);
        let stream = match self.transport.connect(&addr).await {
            Ok(stream) => stream,
            Err(e) => {
                addr.clear_cache().await;
                return Err(e);
            }
        };

        let handler = AcceptingHandler {
            host: endpoint.host().to_string(),
        };
        let mut handle = tokio::time::timeout(
            self.transport.connect_timeout(),
            client::connect_stream(self.ssh_config.clone(), stream, handler),
        )
        .await
        .map_err(|_| {
            TransferError::Timeout(format!("SSH handshake with {}", endpoint.socket_addr()))
        })?
        .map_err(|e| ssh_error("handshake", endpoint, e))?;

        self.authenticate(&mut handle, endpoint).await?;

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| ssh_error("open channel", endpoint, e))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| ssh_error("request sftp subsystem", endpoint, e))?;
        let sftp = SftpChannel::new(channel.into_stream())
            .await
            .map_err(|e| TransferError::Connection(format!("SFTP init {}: {}", endpoint, e)))?;

        let home = sftp
            .canonicalize(".")
            .await
            .map_err(|e| TransferError::Connection(format!("SFTP home {}: {}", endpoint, e)))?;

        info!(endpoint = %endpoint, home = %home, "SFTP session established");

        Ok(SftpSession {
            host: endpoint.host().to_string(),
            cwd: home.clone(),
            home,
            sftp,
            handle,
            connected: true,
            channel_open: true,
        })
    }
}

/// A logged-in SSH connection with an open SFTP channel
pub struct SftpSession {
    host: String,
    home: String,
    cwd: String,
    sftp: SftpChannel,
    handle: client::Handle<AcceptingHandler>,
    connected: bool,
    /// Cleared once an SFTP request fails at the connection level
    channel_open: bool,
}

impl fmt::Debug for SftpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SftpSession")
            .field("host", &self.host)
            .field("home", &self.home)
            .field("cwd", &self.cwd)
            .field("connected", &self.connected)
            .field("channel_open", &self.channel_open)
            .finish()
    }
}

impl SftpSession {
    fn resolve(&self, p: &str) -> String {
        path::resolve(&self.cwd, &self.home, p)
    }

    /// Pass `result` through, closing the channel on connection failures
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_connection_failure() && self.channel_open {
                warn!("SFTP channel to {} is broken: {}", self.host, e);
                self.channel_open = false;
            }
        }
        result
    }
}

#[async_trait]
impl RemoteFileSession for SftpSession {
    fn host(&self) -> &str {
        &self.host
    }

    fn home(&self) -> &str {
        &self.home
    }

    fn working_directory(&self) -> &str {
        &self.cwd
    }

    fn is_connected(&self) -> bool {
        self.connected && self.channel_open && !self.handle.is_closed()
    }

    async fn change_directory(&mut self, p: &str) -> Result<()> {
        let target = self.resolve(p);
        let result = self
            .sftp
            .metadata(target.as_str())
            .await
            .map_err(|e| sftp_error("cd", &target, e));
        let meta = self.track(result)?;
        if !meta.is_dir() {
            return Err(TransferError::NotFound(format!("{} is not a directory", target)));
        }
        debug!("cd {}", target);
        self.cwd = target;
        Ok(())
    }

    async fn list(
        &mut self,
        p: &str,
        include_files: bool,
        include_dirs: bool,
    ) -> Result<Vec<FileDescriptor>> {
        let target = self.resolve(p);
        let result = self
            .sftp
            .read_dir(target.as_str())
            .await
            .map_err(|e| sftp_error("list", &target, e));
        let entries = self.track(result)?;

        let mut listing = Vec::new();
        for entry in entries {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let meta = entry.metadata();
            let is_dir = meta.is_dir();
            if (is_dir && include_dirs) || (!is_dir && include_files) {
                listing.push(FileDescriptor {
                    filename: name,
                    size: meta.size.unwrap_or(0),
                    mtime: meta.mtime.map(u64::from).unwrap_or(0),
                    is_dir,
                });
            }
        }
        Ok(listing)
    }

    async fn get(&mut self, filename: &str) -> Result<RemoteReader> {
        let target = self.resolve(filename);
        let result = self
            .sftp
            .open_with_flags(target.as_str(), OpenFlags::READ)
            .await
            .map_err(|e| sftp_error("get", &target, e));
        let file = self.track(result)?;
        Ok(Box::new(file))
    }

    async fn open_write(&mut self, filename: &str, mode: WriteMode) -> Result<RemoteWriter> {
        let target = self.resolve(filename);
        let flags = match mode {
            WriteMode::Overwrite => OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            WriteMode::Append => OpenFlags::CREATE | OpenFlags::APPEND | OpenFlags::WRITE,
        };
        let result = self
            .sftp
            .open_with_flags(target.as_str(), flags)
            .await
            .map_err(|e| sftp_error("put", &target, e));
        let mut file = self.track(result)?;

        if mode == WriteMode::Append {
            let result = self
                .sftp
                .metadata(target.as_str())
                .await
                .map_err(|e| sftp_error("stat", &target, e));
            let size = self.track(result)?.size.unwrap_or(0);
            file.seek(io::SeekFrom::Start(size))
                .await
                .map_err(|e| TransferError::transfer("seek", target.as_str(), e))?;
        }
        Ok(Box::new(file))
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let source = self.resolve(from);
        let target = self.resolve(to);
        debug!("rename {} -> {}", source, target);
        let result = self
            .sftp
            .rename(source.as_str(), target.as_str())
            .await
            .map_err(|e| sftp_error("rename", &source, e));
        self.track(result)
    }

    async fn delete(&mut self, filename: &str) -> Result<()> {
        let target = self.resolve(filename);
        let result = self
            .sftp
            .remove_file(target.as_str())
            .await
            .map_err(|e| sftp_error("delete", &target, e));
        self.track(result)
    }

    async fn mkdir(&mut self, p: &str) -> Result<()> {
        let target = self.resolve(p);
        let result = self
            .sftp
            .create_dir(target.as_str())
            .await
            .map_err(|e| sftp_error("mkdir", &target, e));
        self.track(result)
    }

    async fn rmdir(&mut self, p: &str) -> Result<()> {
        let target = self.resolve(p);
        let result = self
            .sftp
            .remove_dir(target.as_str())
            .await
            .map_err(|e| sftp_error("rmdir", &target, e));
        self.track(result)
    }

    async fn chmod(&mut self, p: &str, permissions: u32) -> Result<()> {
        let target = self.resolve(p);
        let mut attrs = FileAttributes::default();
        attrs.permissions = Some(permissions);
        let result = self
            .sftp
            .set_metadata(target.as_str(), attrs)
            .await
            .map_err(|e| sftp_error("chmod", &target, e));
        self.track(result)
    }

    async fn stat(&mut self, filename: &str) -> Result<FileStat> {
        let target = self.resolve(filename);
        let result = self
            .sftp
            .metadata(target.as_str())
            .await
            .map_err(|e| sftp_error("stat", &target, e));
        let meta = self.track(result)?;
        Ok(FileStat {
            size: meta.size.unwrap_or(0),
            mtime: meta.mtime.map(u64::from).unwrap_or(0),
        })
    }

    async fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;

        if let Err(e) = self.sftp.close().await {
            debug!("Error closing SFTP channel to {}: {}", self.host, e);
        }
        if let Err(e) = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            warn!("Error disconnecting from {}: {}", self.host, e);
        }
        debug!("Disconnected from {}", self.host);
        Ok(())
    }
}
