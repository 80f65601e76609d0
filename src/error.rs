//! Error types for sftp-courier
//!
//! This module defines the error taxonomy shared by sessions, pools,
//! the inbound scanner and the outbound dispatcher.

use std::io;
use thiserror::Error;

/// Main error type for transfer operations
#[derive(Error, Debug)]
pub enum TransferError {
    /// Authentication or network failure; fatal to the session
    #[error("Connection error: {0}")]
    Connection(String),

    /// I/O failure during get/put/rename/delete/stat
    #[error("Transfer error: {op} '{path}': {source}")]
    Transfer {
        /// Operation that failed
        op: &'static str,
        /// Remote path involved
        path: String,
        /// Underlying cause
        #[source]
        source: io::Error,
    },

    /// Remote file or directory does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Target file exists and the duplicate policy forbids overwriting it
    #[error("File already exists: {0}")]
    AlreadyExists(String),

    /// Invalid configuration or payload, never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Pool error
    #[error("Pool error: {0}")]
    Pool(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Whether an I/O error of this kind means the connection is gone
pub fn is_connection_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::NotConnected
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
    )
}

impl TransferError {
    /// Build a transfer error wrapping an I/O cause
    pub fn transfer(op: &'static str, path: impl Into<String>, source: io::Error) -> Self {
        TransferError::Transfer {
            op,
            path: path.into(),
            source,
        }
    }

    /// Build a transfer error from any displayable cause
    pub fn transfer_msg(op: &'static str, path: impl Into<String>, msg: impl ToString) -> Self {
        TransferError::Transfer {
            op,
            path: path.into(),
            source: io::Error::new(io::ErrorKind::Other, msg.to_string()),
        }
    }

    /// Whether the failure means the underlying connection is gone
    pub fn is_connection_failure(&self) -> bool {
        match self {
            TransferError::Connection(_) => true,
            TransferError::Transfer { source, .. } => is_connection_kind(source.kind()),
            _ => false,
        }
    }

    /// Whether retrying the same operation can never succeed
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            TransferError::Validation(_) | TransferError::Config(_)
        )
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_display() {
        let err = TransferError::Connection("auth failed".to_string());
        assert_eq!(format!("{}", err), "Connection error: auth failed");

        let err = TransferError::NotFound("/upload/a.txt".to_string());
        assert_eq!(format!("{}", err), "Not found: /upload/a.txt");

        let err = TransferError::AlreadyExists("a.txt".to_string());
        assert_eq!(format!("{}", err), "File already exists: a.txt");

        let err = TransferError::Validation("bad payload".to_string());
        assert_eq!(format!("{}", err), "Validation error: bad payload");

        let err = TransferError::Pool("closed".to_string());
        assert_eq!(format!("{}", err), "Pool error: closed");

        let err = TransferError::Timeout("acquire".to_string());
        assert_eq!(format!("{}", err), "Timeout: acquire");

        let err = TransferError::Config("missing host".to_string());
        assert_eq!(format!("{}", err), "Configuration error: missing host");
    }

    #[test]
    fn test_transfer_error_wraps_cause() {
        let err = TransferError::transfer(
            "rename",
            "/in/a.txt",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(format!("{}", err), "Transfer error: rename '/in/a.txt': denied");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_transfer_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::Other, "io error");
        let err: TransferError = io_err.into();
        assert!(matches!(err, TransferError::Io(_)));
    }

    #[test]
    fn test_connection_failure_classification() {
        assert!(TransferError::Connection("x".into()).is_connection_failure());
        assert!(TransferError::transfer(
            "get",
            "a",
            io::Error::new(io::ErrorKind::NotConnected, "gone")
        )
        .is_connection_failure());
        assert!(!TransferError::transfer(
            "get",
            "a",
            io::Error::new(io::ErrorKind::PermissionDenied, "no")
        )
        .is_connection_failure());
        assert!(!TransferError::NotFound("a".into()).is_connection_failure());
    }

    #[test]
    fn test_permanent_classification() {
        assert!(TransferError::Validation("x".into()).is_permanent());
        assert!(TransferError::Config("x".into()).is_permanent());
        assert!(!TransferError::Timeout("x".into()).is_permanent());
    }
}
