//! Local archive copies of inbound files
//!
//! A remote file is first copied into the temp-receiving directory, moved
//! to temp-sending once complete and finally into the archive directory
//! when its stream is closed without error.

use crate::error::{Result, TransferError};
use crate::helper::DEFAULT_BUFFER_SIZE;
use crate::session::RemoteReader;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// Copy `reader` into `dir/name`, removing the partial copy on failure
pub async fn receive(reader: &mut RemoteReader, dir: &Path, name: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).await?;
    let target = dir.join(name);

    let result = async {
        let file = fs::File::create(&target).await?;
        let mut file = BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file);
        let copied = tokio::io::copy(reader, &mut file).await?;
        file.flush().await?;
        file.get_ref().sync_all().await?;
        Ok::<_, std::io::Error>(copied)
    }
    .await;

    match result {
        Ok(copied) => {
            debug!("Received {} bytes into {}", copied, target.display());
            Ok(target)
        }
        Err(e) => {
            if let Err(rm) = fs::remove_file(&target).await {
                warn!("Failed to remove partial copy {}: {}", target.display(), rm);
            }
            Err(TransferError::transfer("archive", target.display().to_string(), e))
        }
    }
}

/// Move `file` into `dir`, keeping its name
///
/// Falls back to copy and remove when a plain rename is impossible, e.g.
/// across filesystems.
pub async fn move_into(file: &Path, dir: &Path) -> Result<PathBuf> {
    let name = file
        .file_name()
        .ok_or_else(|| TransferError::Validation(format!("{} has no file name", file.display())))?;
    fs::create_dir_all(dir).await?;
    let target = dir.join(name);

    if fs::rename(file, &target).await.is_err() {
        fs::copy(file, &target).await?;
        fs::remove_file(file).await?;
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, ReadBuf};

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
        }
    }

    #[tokio::test]
    async fn test_receive_and_move() {
        let tmp = tempfile::tempdir().unwrap();
        let receiving = tmp.path().join("receiving");
        let archive = tmp.path().join("archive");

        let mut reader: RemoteReader = Box::new(io::Cursor::new(b"data".to_vec()));
        let copy = receive(&mut reader, &receiving, "a.txt").await.unwrap();
        assert_eq!(std::fs::read(&copy).unwrap(), b"data");

        let archived = move_into(&copy, &archive).await.unwrap();
        assert_eq!(archived, archive.join("a.txt"));
        assert!(!copy.exists());
        assert_eq!(std::fs::read(&archived).unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_receive_failure_removes_partial_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reader: RemoteReader = Box::new(FailingReader);

        let err = receive(&mut reader, tmp.path(), "b.txt").await.unwrap_err();
        assert!(matches!(err, TransferError::Transfer { op: "archive", .. }));
        assert!(!tmp.path().join("b.txt").exists());
    }
}
