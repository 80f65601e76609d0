//! # sftp-courier - Polling SFTP File Transfer Connector
//!
//! sftp-courier moves files between local consumers and remote SFTP servers.
//! Inbound endpoints are polled for complete files, which are streamed to a
//! consumer and then deleted or archived. Outbound endpoints receive
//! payloads, written through a staging directory and renamed into place.
//!
//! ## Features
//!
//! - **Pooled Sessions**: authenticated sessions cached per endpoint, with
//!   disabled, unbounded or bounded (blocking) pools
//! - **Completeness Checks**: file age and size stability before pickup
//! - **Exactly-Once Cleanup**: inbound streams delete, keep or archive the
//!   remote file exactly once on close, and always release their session
//! - **Atomic Outbound Writes**: temp directory staging with cleanup of
//!   partial files and configurable duplicate handling
//! - **Pluggable Backends**: russh-based SFTP sessions or an in-memory
//!   filesystem for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sftp_courier::config::load_config;
//! use sftp_courier::coordinator::TransferCoordinator;
//! use sftp_courier::outbound::{OutboundDispatcher, OutboundMessage};
//! use sftp_courier::session::SftpSessionFactory;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("courier.toml")?;
//!     let factory = SftpSessionFactory::from_config(&config.connector)?;
//!     let coordinator = Arc::new(TransferCoordinator::new(
//!         config.connector.name.clone(),
//!         Arc::new(factory),
//!         config.connector.pool.clone(),
//!     ));
//!
//!     let endpoint = &config.outbound[0];
//!     let dispatcher = OutboundDispatcher::new(
//!         coordinator,
//!         endpoint.endpoint_address()?,
//!         config.policy_for(endpoint),
//!     );
//!     dispatcher
//!         .send(OutboundMessage::new("hello").with_filename("hello.txt"))
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! PollingScanner ─┐                      ┌─ SessionPool ─ RemoteFileSession
//!                 ├─ TransferCoordinator ┤
//! OutboundDispatcher ┘                   └─ SessionPool ─ RemoteFileSession
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod helper;
pub mod inbound;
pub mod outbound;
pub mod pool;
pub mod session;
pub mod transport;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use coordinator::TransferCoordinator;
pub use error::{Result, TransferError};
pub use inbound::{InboundStream, PollingScanner};
pub use outbound::{OutboundDispatcher, OutboundMessage, Payload};
pub use session::{RemoteFileSession, SessionFactory};

/// Version of the sftp-courier library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "sftp-courier");
    }
}
