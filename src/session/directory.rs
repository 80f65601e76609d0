//! Directory helpers built on top of [`RemoteFileSession`]

use super::{path, RemoteFileSession};
use crate::error::{Result, TransferError};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Make sure `base/dir` exists, creating `dir` inside `base` if needed
///
/// Runs under `lock` so concurrent creators are serialized. The session's
/// working directory is restored afterwards whatever the outcome. A
/// `mkdir` that loses a race against another process is tolerated when the
/// directory is usable afterwards.
pub async fn ensure_directory<S>(session: &mut S, base: &str, dir: &str, lock: &Mutex<()>) -> Result<()>
where
    S: RemoteFileSession + ?Sized,
{
    let _guard = lock.lock().await;
    let original = session.working_directory().to_string();

    let result = create_if_missing(session, base, dir).await;

    if let Err(e) = session.change_directory(&original).await {
        warn!("Failed to restore working directory {}: {}", original, e);
        if result.is_ok() {
            return Err(e);
        }
    }
    result
}

async fn create_if_missing<S>(session: &mut S, base: &str, dir: &str) -> Result<()>
where
    S: RemoteFileSession + ?Sized,
{
    let target = path::join(&session.absolute_path(base), dir);

    match session.change_directory(&target).await {
        Ok(()) => return Ok(()),
        Err(TransferError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    session.change_directory(base).await?;
    if let Err(e) = session.mkdir(dir).await {
        debug!("mkdir {} failed: {}, checking whether it exists now", target, e);
        return session.change_directory(&target).await.map_err(|_| e);
    }

    info!("Created remote directory {}", target);
    session.change_directory(&target).await
}

/// Delete `dir` with all files and subdirectories
pub fn delete_recursively<'a, S>(session: &'a mut S, dir: &'a str) -> BoxFuture<'a, Result<()>>
where
    S: RemoteFileSession + ?Sized,
{
    async move {
        let entries = session.list(dir, true, true).await?;
        for entry in entries {
            let child = path::join(dir, &entry.filename);
            if entry.is_dir {
                delete_recursively(&mut *session, &child).await?;
            } else {
                session.delete(&child).await?;
            }
        }
        session.rmdir(dir).await?;
        debug!("Deleted remote directory {}", dir);
        Ok(())
    }
    .boxed()
}
