//! Session pool module for sftp-courier
//!
//! This module provides per-endpoint pooling of authenticated remote file
//! sessions, so repeated transfers can skip the connect and login steps.

mod entry;
mod guard;
mod session_pool;
mod stats;

pub use entry::IdleEntry;
pub use guard::PooledSession;
pub use session_pool::SessionPool;
pub use stats::{PoolStats, PoolStatsSnapshot};
