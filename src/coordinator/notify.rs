//! Transfer notifications
//!
//! Every completed get, put, rename and delete is published on a broadcast
//! channel. Nobody has to listen.

use std::fmt;
use tokio::sync::broadcast;
use tracing::trace;

/// Default capacity of the notification channel
pub const DEFAULT_NOTIFY_CAPACITY: usize = 256;

/// Kind of completed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferAction {
    /// A remote file was read
    Get,
    /// A remote file was written
    Put,
    /// A remote file was renamed
    Rename,
    /// A remote file was deleted
    Delete,
}

impl fmt::Display for TransferAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferAction::Get => "get",
            TransferAction::Put => "put",
            TransferAction::Rename => "rename",
            TransferAction::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A completed operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    /// What happened
    pub action: TransferAction,
    /// Remote path the operation acted on
    pub path: String,
    /// Bytes moved, when known
    pub size: Option<u64>,
}

/// Broadcasts [`TransferEvent`]s
#[derive(Debug, Clone)]
pub struct TransferNotifier {
    tx: broadcast::Sender<TransferEvent>,
}

impl Default for TransferNotifier {
    fn default() -> Self {
        TransferNotifier::new(DEFAULT_NOTIFY_CAPACITY)
    }
}

impl TransferNotifier {
    /// Create a notifier buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        TransferNotifier { tx }
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.tx.subscribe()
    }

    /// Publish an event
    pub fn notify(&self, action: TransferAction, path: impl Into<String>, size: Option<u64>) {
        let event = TransferEvent {
            action,
            path: path.into(),
            size,
        };
        trace!("Transfer event: {} {}", event.action, event.path);
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}
