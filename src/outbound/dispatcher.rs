//! Outbound dispatcher
//!
//! Writes one payload per call to an outbound endpoint. With a temp dir
//! configured the content is written there first and renamed into place,
//! so readers never see a partial file under its final name. Whatever
//! happens, the borrowed session goes back to the pool and a partial temp
//! file is removed.

use super::duplicate::unique_name;
use super::filename::{FilenameParser, TemplateFilenameParser};
use super::payload::Payload;
use crate::config::{DuplicateHandling, EndpointAddress, TransferPolicy};
use crate::coordinator::{TransferAction, TransferCoordinator};
use crate::error::{Result, TransferError};
use crate::helper::with_timestamp_suffix;
use crate::session::{path, RemoteFileSession, SessionFactory, WriteMode};
use chrono::Local;
use std::fmt;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// One outbound transfer request
#[derive(Debug)]
pub struct OutboundMessage {
    /// Content to write
    pub payload: Payload,
    /// Remote name; computed from the output pattern when absent
    pub filename: Option<String>,
    /// Name the content had at its origin, for `${ORIGINALNAME}`
    pub original_filename: Option<String>,
}

impl OutboundMessage {
    /// Message carrying `payload`
    pub fn new(payload: impl Into<Payload>) -> Self {
        OutboundMessage {
            payload: payload.into(),
            filename: None,
            original_filename: None,
        }
    }

    /// Force the remote name
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Set the origin name
    pub fn with_original_filename(mut self, filename: impl Into<String>) -> Self {
        self.original_filename = Some(filename.into());
        self
    }
}

/// Result of a completed dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    /// Final remote path
    pub path: String,
    /// Final remote name
    pub filename: String,
    /// Bytes written
    pub bytes: u64,
}

/// Sends payloads to one outbound endpoint
pub struct OutboundDispatcher<F: SessionFactory> {
    coordinator: Arc<TransferCoordinator<F>>,
    endpoint: EndpointAddress,
    policy: TransferPolicy,
    parser: Arc<dyn FilenameParser>,
}

impl<F: SessionFactory> fmt::Debug for OutboundDispatcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundDispatcher")
            .field("endpoint", &self.endpoint.to_string())
            .field("parser", &self.parser)
            .finish()
    }
}

impl<F: SessionFactory> OutboundDispatcher<F> {
    /// Create a dispatcher using the template filename parser
    pub fn new(
        coordinator: Arc<TransferCoordinator<F>>,
        endpoint: EndpointAddress,
        policy: TransferPolicy,
    ) -> Self {
        OutboundDispatcher {
            coordinator,
            endpoint,
            policy,
            parser: Arc::new(TemplateFilenameParser::new()),
        }
    }

    /// Replace the filename parser
    pub fn with_parser(mut self, parser: Arc<dyn FilenameParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Target endpoint
    pub fn endpoint(&self) -> &EndpointAddress {
        &self.endpoint
    }

    /// Write `message` to the endpoint
    pub async fn send(&self, message: OutboundMessage) -> Result<Dispatched> {
        let OutboundMessage {
            payload,
            filename,
            original_filename,
        } = message;
        payload.validate()?;

        let filename = filename.unwrap_or_else(|| {
            self.parser.get_filename(
                original_filename.as_deref(),
                self.policy.output_pattern.as_deref(),
            )
        });
        let reserved = matches!(filename.as_str(), "" | "." | "..");
        if reserved || filename.contains('/') {
            return Err(TransferError::Validation(format!(
                "Invalid outbound filename '{filename}'"
            )));
        }

        let mut session = self
            .coordinator
            .acquire(&self.endpoint, self.policy.max_pool_size)
            .await?;
        let result = self.transfer(&mut session, payload, filename).await;
        match &result {
            Ok(_) => session.finish().await,
            Err(e) => {
                if e.is_connection_failure() {
                    self.coordinator.mark_disconnected();
                }
                session.finish_with_error(e).await;
            }
        }
        result
    }

    async fn transfer(
        &self,
        session: &mut F::Session,
        payload: Payload,
        filename: String,
    ) -> Result<Dispatched> {
        let dir = session.working_directory().to_string();

        let filename = match self.policy.duplicate_handling {
            DuplicateHandling::Throw => {
                if session.list_files(".").await?.contains(&filename) {
                    return Err(TransferError::AlreadyExists(path::join(&dir, &filename)));
                }
                filename
            }
            DuplicateHandling::UniqueSuffix => {
                let existing = session.list_files(".").await?;
                unique_name(&existing, &filename)
            }
            DuplicateHandling::Overwrite | DuplicateHandling::Append => filename,
        };
        let target = path::join(&dir, &filename);

        let mode = match self.policy.duplicate_handling {
            DuplicateHandling::Append => WriteMode::Append,
            _ => WriteMode::Overwrite,
        };

        let staged = match (&self.policy.temp_dir_outbound, mode) {
            (Some(temp_dir), WriteMode::Overwrite) => {
                self.coordinator
                    .ensure_directory(session, &dir, temp_dir)
                    .await?;
                let name = if self.policy.use_temp_file_timestamp_suffix {
                    with_timestamp_suffix(&filename, Local::now())
                } else {
                    filename.clone()
                };
                let temp = session.absolute_path(&path::join(&dir, temp_dir));
                Some(path::join(&temp, &name))
            }
            (Some(_), WriteMode::Append) => {
                debug!("Appending to {} in place, temp dir not used", target);
                None
            }
            (None, _) => None,
        };
        let write_path = staged.as_deref().unwrap_or(&target);

        let bytes = match write_payload(session, write_path, payload, mode).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Some(staged) = &staged {
                    remove_partial(session, staged).await;
                }
                return Err(e);
            }
        };
        self.coordinator
            .notifier()
            .notify(TransferAction::Put, write_path, Some(bytes));

        if let Some(staged) = &staged {
            if let Err(e) = self.move_into_place(session, staged, &target).await {
                remove_partial(session, staged).await;
                return Err(e);
            }
            self.coordinator
                .notifier()
                .notify(TransferAction::Rename, target.as_str(), Some(bytes));
        }

        info!("Sent {} bytes to {}", bytes, target);
        Ok(Dispatched {
            path: target,
            filename,
            bytes,
        })
    }

    /// Rename the staged file onto `target`, replacing it when overwriting
    async fn move_into_place(
        &self,
        session: &mut F::Session,
        staged: &str,
        target: &str,
    ) -> Result<()> {
        match session.rename(staged, target).await {
            Ok(()) => Ok(()),
            Err(e) if self.policy.duplicate_handling == DuplicateHandling::Overwrite => {
                debug!("Rename onto {} failed: {}, replacing it", target, e);
                if session.delete(target).await.is_err() {
                    return Err(e);
                }
                session.rename(staged, target).await
            }
            Err(e) => Err(e),
        }
    }
}

async fn write_payload<S>(
    session: &mut S,
    remote: &str,
    payload: Payload,
    mode: WriteMode,
) -> Result<u64>
where
    S: RemoteFileSession + ?Sized,
{
    let mut writer = session.open_write(remote, mode).await?;
    let bytes = payload
        .write_to(&mut writer)
        .await
        .map_err(|e| TransferError::transfer("put", remote, e))?;
    writer
        .shutdown()
        .await
        .map_err(|e| TransferError::transfer("close", remote, e))?;
    Ok(bytes)
}

async fn remove_partial<S>(session: &mut S, staged: &str)
where
    S: RemoteFileSession + ?Sized,
{
    match session.delete(staged).await {
        Ok(()) => debug!("Removed partial file {}", staged),
        Err(TransferError::NotFound(_)) => {}
        Err(e) => warn!("Failed to remove partial file {}: {}", staged, e),
    }
}
