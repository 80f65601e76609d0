//! Completion checks for inbound files
//!
//! A file still being written by another process must not be picked up.
//! Two independent heuristics decide whether a file is complete: its age
//! and whether its size stays put over a short delay. A failing check
//! counts as "not complete yet".

use crate::config::TransferPolicy;
use crate::helper::epoch_millis;
use crate::session::RemoteFileSession;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Whether `filename` was last modified at least `min_age` before `now`
pub async fn is_old_enough<S>(session: &mut S, filename: &str, min_age: Duration, now: SystemTime) -> bool
where
    S: RemoteFileSession + ?Sized,
{
    match session.last_modified(filename).await {
        Ok(modified) => {
            let age = epoch_millis(now) as i128 - modified as i128;
            let ready = age >= min_age.as_millis() as i128;
            if !ready {
                debug!("{} is too young ({} ms)", filename, age);
            }
            ready
        }
        Err(e) => {
            debug!("Age check of {} failed: {}", filename, e);
            false
        }
    }
}

/// Whether the size of `filename` is unchanged after `delay`
pub async fn is_size_stable<S>(session: &mut S, filename: &str, delay: Duration) -> bool
where
    S: RemoteFileSession + ?Sized,
{
    let first = match session.size(filename).await {
        Ok(size) => size,
        Err(e) => {
            debug!("Size check of {} failed: {}", filename, e);
            return false;
        }
    };
    tokio::time::sleep(delay).await;
    match session.size(filename).await {
        Ok(second) if second == first => true,
        Ok(second) => {
            debug!("{} is still growing ({} -> {} bytes)", filename, first, second);
            false
        }
        Err(e) => {
            debug!("Size check of {} failed: {}", filename, e);
            false
        }
    }
}

/// Whether `filename` passes every check enabled in `policy`
pub async fn is_complete<S>(session: &mut S, filename: &str, policy: &TransferPolicy) -> bool
where
    S: RemoteFileSession + ?Sized,
{
    if let Some(min_age) = policy.file_age {
        if !is_old_enough(session, filename, min_age, SystemTime::now()).await {
            return false;
        }
    }
    if let Some(delay) = policy.size_check_delay {
        if !is_size_stable(session, filename, delay).await {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credentials, EndpointAddress};
    use crate::session::{MemoryFileSystem, MemorySession, MemorySessionFactory, SessionFactory};

    async fn session(fs: &MemoryFileSystem) -> MemorySession {
        let endpoint =
            EndpointAddress::new("mem", 22, "u", "/", Credentials::Password("pw".into()));
        MemorySessionFactory::new(fs.clone())
            .connect(&endpoint)
            .await
            .unwrap()
    }

    fn at_secs(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn test_age_check() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/in/a.txt", "x");
        fs.set_mtime("/in/a.txt", 1_000);
        let mut s = session(&fs).await;

        let min_age = Duration::from_secs(60);
        assert!(!is_old_enough(&mut s, "/in/a.txt", min_age, at_secs(1_030)).await);
        assert!(is_old_enough(&mut s, "/in/a.txt", min_age, at_secs(1_060)).await);
        // clock skew: modified in the future
        assert!(!is_old_enough(&mut s, "/in/a.txt", min_age, at_secs(900)).await);
    }

    #[tokio::test]
    async fn test_age_check_failure_defers() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/in/a.txt", "x");
        fs.fail_stat("/in/a.txt");
        let mut s = session(&fs).await;

        assert!(!is_old_enough(&mut s, "/in/a.txt", Duration::ZERO, SystemTime::now()).await);
        assert!(!is_old_enough(&mut s, "/in/missing", Duration::ZERO, SystemTime::now()).await);
    }

    #[tokio::test]
    async fn test_size_check() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/in/stable.txt", "abc");
        fs.add_file("/in/growing.txt", "abc");
        fs.grow_on_stat("/in/growing.txt", 10);
        let mut s = session(&fs).await;

        let delay = Duration::from_millis(5);
        assert!(is_size_stable(&mut s, "/in/stable.txt", delay).await);
        assert!(!is_size_stable(&mut s, "/in/growing.txt", delay).await);

        fs.fail_stat("/in/stable.txt");
        assert!(!is_size_stable(&mut s, "/in/stable.txt", delay).await);
    }

    #[tokio::test]
    async fn test_is_complete_requires_both_checks() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/in/a.txt", "abc");
        fs.set_mtime("/in/a.txt", 1);
        fs.add_file("/in/fresh.txt", "abc");
        fs.add_file("/in/grow.txt", "abc");
        fs.set_mtime("/in/grow.txt", 1);
        fs.grow_on_stat("/in/grow.txt", 1);
        let mut s = session(&fs).await;

        let policy = TransferPolicy {
            file_age: Some(Duration::from_secs(3600)),
            size_check_delay: Some(Duration::from_millis(5)),
            ..TransferPolicy::default()
        };
        assert!(is_complete(&mut s, "/in/a.txt", &policy).await);
        assert!(!is_complete(&mut s, "/in/fresh.txt", &policy).await);
        assert!(!is_complete(&mut s, "/in/grow.txt", &policy).await);

        assert!(is_complete(&mut s, "/in/fresh.txt", &TransferPolicy::default()).await);
    }
}
