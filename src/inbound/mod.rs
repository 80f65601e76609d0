//! Inbound side: polling remote directories and handing files downstream
//!
//! - [`PollingScanner`]: lists an endpoint, filters, checks completeness,
//!   locks and routes every file
//! - [`retrieve`]: stages and opens one remote file
//! - [`InboundStream`]: the consumer's byte stream, cleaning up exactly once
//! - [`FileConsumer`]: where routed files go

mod archive;
mod consumer;
mod filter;
mod lock;
mod retrieve;
mod scanner;
pub mod stability;
mod stream;

pub use consumer::{FileConsumer, LocalDirectoryConsumer};
pub use filter::NameFilter;
pub use lock::{FileLockGuard, LocalLockFactory, LockFactory, DEFAULT_LOCK_TIMEOUT};
pub use retrieve::{retrieve, Delivery, InboundFile};
pub use scanner::{PollReport, PollingScanner, ScannerState};
pub use stream::{InboundStream, OnClose, RemoteCleanup};
