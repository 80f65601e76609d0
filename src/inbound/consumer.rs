//! Downstream consumers of inbound files

use super::retrieve::Delivery;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Receives every inbound file a scanner picks up
///
/// Returning an error rejects the file: its stream is closed as failed and,
/// unless the policy says otherwise, the remote file is kept.
#[async_trait]
pub trait FileConsumer: Debug + Send + Sync {
    /// Consume one file
    async fn route_file(&self, delivery: Delivery<'_>) -> Result<()>;
}

/// Writes inbound files into a local directory under their original name
///
/// Content goes to a hidden `.part` file first and is renamed once
/// complete.
#[derive(Debug, Clone)]
pub struct LocalDirectoryConsumer {
    dir: PathBuf,
}

impl LocalDirectoryConsumer {
    /// Deliver into `dir`, created on first use
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        LocalDirectoryConsumer { dir: dir.into() }
    }

    /// Target directory
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }
}

#[async_trait]
impl FileConsumer for LocalDirectoryConsumer {
    async fn route_file(&self, delivery: Delivery<'_>) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let target = self.dir.join(delivery.original_filename);
        let partial = self.dir.join(format!(".{}.part", delivery.original_filename));

        let result = async {
            let mut file = fs::File::create(&partial).await?;
            let copied = tokio::io::copy(delivery.reader, &mut file).await?;
            file.flush().await?;
            fs::rename(&partial, &target).await?;
            Ok::<_, std::io::Error>(copied)
        }
        .await;

        match result {
            Ok(copied) => {
                info!("Delivered {} ({} bytes) to {}", delivery.filename, copied, target.display());
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_directory_consumer() {
        let tmp = tempfile::tempdir().unwrap();
        let consumer = LocalDirectoryConsumer::new(tmp.path().join("out"));

        let mut reader: &[u8] = b"content";
        consumer
            .route_file(Delivery {
                filename: "a_20240101.txt",
                original_filename: "a.txt",
                size: 7,
                reader: &mut reader,
            })
            .await
            .unwrap();

        let delivered = tmp.path().join("out").join("a.txt");
        assert_eq!(std::fs::read(delivered).unwrap(), b"content");
        assert!(!tmp.path().join("out").join(".a.txt.part").exists());
    }
}
