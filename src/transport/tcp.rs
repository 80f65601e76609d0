//! TCP transport implementation
//!
//! Provides plain TCP connections for SSH handshakes.

use super::{AddrMaybeCached, SocketOpts};
use crate::config::TcpConfig;
use crate::error::{Result, TransferError};
use crate::helper::DEFAULT_CONNECT_TIMEOUT_SECS;
use std::time::Duration;
use tokio::net::TcpStream;

/// TCP transport for plain connections
#[derive(Debug, Clone)]
pub struct TcpTransport {
    /// Socket options to apply to connections
    socket_opts: SocketOpts,
    /// Connection timeout
    connect_timeout: Duration,
}

impl TcpTransport {
    /// Create a new TCP transport with default options
    pub fn with_defaults() -> Self {
        TcpTransport {
            socket_opts: SocketOpts::default(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Create a transport from TCP config
    pub fn from_config(config: &TcpConfig, connect_timeout: Duration) -> Self {
        TcpTransport {
            socket_opts: SocketOpts::from_tcp_config(config),
            connect_timeout,
        }
    }

    /// Set socket options
    pub fn with_socket_opts(mut self, opts: SocketOpts) -> Self {
        self.socket_opts = opts;
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Connection timeout
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Connect to a remote address
    pub async fn connect(&self, addr: &AddrMaybeCached) -> Result<TcpStream> {
        let resolved = addr.resolve().await?;

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(resolved))
            .await
            .map_err(|_| {
                TransferError::Timeout(format!("Connection timeout to {}", addr.addr()))
            })?
            .map_err(|e| {
                TransferError::Connection(format!("Failed to connect to {}: {}", addr.addr(), e))
            })?;

        if let Err(e) = self.socket_opts.apply(&stream) {
            tracing::warn!("Failed to apply socket options: {}", e);
        }

        tracing::debug!("TCP connection established to {}", resolved);

        Ok(stream)
    }
}
