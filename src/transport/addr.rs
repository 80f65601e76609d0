//! Address handling with DNS caching
//!
//! Pooled sessions reconnect to the same host many times, so the resolved
//! socket address is cached until a connect through it fails.

use crate::config::EndpointAddress;
use crate::error::{Result, TransferError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Address that may have a cached resolved address
#[derive(Debug, Clone)]
pub struct AddrMaybeCached {
    /// The original `host:port` string
    addr: String,
    /// Cached resolved address
    cached: Arc<RwLock<Option<SocketAddr>>>,
}

impl AddrMaybeCached {
    /// Create a new address without cached resolution
    pub fn new(addr: &str) -> Self {
        AddrMaybeCached {
            addr: addr.to_string(),
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// Create a new address with a pre-resolved address
    pub fn with_cached(addr: &str, resolved: SocketAddr) -> Self {
        AddrMaybeCached {
            addr: addr.to_string(),
            cached: Arc::new(RwLock::new(Some(resolved))),
        }
    }

    /// Get the original address string
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Get the cached address if available
    pub async fn get_cached(&self) -> Option<SocketAddr> {
        *self.cached.read().await
    }

    /// Clear the cached address
    pub async fn clear_cache(&self) {
        *self.cached.write().await = None;
    }

    /// Resolve the address, using cache if available
    pub async fn resolve(&self) -> Result<SocketAddr> {
        if let Some(cached) = self.get_cached().await {
            return Ok(cached);
        }

        let resolved = self.resolve_fresh().await?;
        *self.cached.write().await = Some(resolved);
        Ok(resolved)
    }

    /// Resolve the address without using cache
    pub async fn resolve_fresh(&self) -> Result<SocketAddr> {
        tokio::net::lookup_host(self.addr.as_str())
            .await
            .map_err(|e| {
                TransferError::Connection(format!("Failed to resolve address {}: {}", self.addr, e))
            })?
            .next()
            .ok_or_else(|| TransferError::Connection(format!("No addresses found for: {}", self.addr)))
    }
}

impl From<&EndpointAddress> for AddrMaybeCached {
    fn from(endpoint: &EndpointAddress) -> Self {
        AddrMaybeCached::new(&endpoint.socket_addr())
    }
}

impl From<SocketAddr> for AddrMaybeCached {
    fn from(addr: SocketAddr) -> Self {
        AddrMaybeCached::with_cached(&addr.to_string(), addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn test_addr_maybe_cached_new() {
        let addr = AddrMaybeCached::new("example.com:22");
        assert_eq!(addr.addr(), "example.com:22");
        assert!(addr.get_cached().await.is_none());
    }

    #[tokio::test]
    async fn test_addr_from_endpoint() {
        let endpoint = EndpointAddress::new(
            "files.example.com",
            2222,
            "bob",
            "/in",
            Credentials::Password("pw".to_string()),
        );
        let addr = AddrMaybeCached::from(&endpoint);
        assert_eq!(addr.addr(), "files.example.com:2222");
    }

    #[tokio::test]
    async fn test_resolve_localhost_caches() {
        let addr = AddrMaybeCached::new("127.0.0.1:2222");
        let resolved = addr.resolve().await.unwrap();

        assert_eq!(resolved.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(resolved.port(), 2222);
        assert_eq!(addr.get_cached().await, Some(resolved));

        addr.clear_cache().await;
        assert!(addr.get_cached().await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_uses_cache() {
        let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), 22);
        let addr = AddrMaybeCached::with_cached("invalid.invalid:22", socket_addr);

        assert_eq!(addr.resolve().await.unwrap(), socket_addr);
    }

    #[tokio::test]
    async fn test_resolve_invalid_address() {
        let addr = AddrMaybeCached::new("no-port-here");
        let err = addr.resolve_fresh().await.unwrap_err();
        assert!(matches!(err, TransferError::Connection(_)));
    }
}
