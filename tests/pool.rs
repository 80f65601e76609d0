//! Session pool tests against the memory backend

mod common;

use common::{coordinator, endpoint};
use sftp_courier::config::{PoolConfig, PoolLimit};
use sftp_courier::error::TransferError;
use sftp_courier::pool::SessionPool;
use sftp_courier::session::{MemoryFileSystem, MemorySessionFactory, RemoteFileSession};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn pool(fs: &MemoryFileSystem, limit: PoolLimit, acquire_timeout: u64) -> SessionPool<MemorySessionFactory> {
    SessionPool::new(
        endpoint("/data"),
        Arc::new(MemorySessionFactory::new(fs.clone())),
        limit,
        &PoolConfig {
            acquire_timeout,
            ..PoolConfig::default()
        },
    )
}

#[tokio::test]
async fn test_bounded_pool_blocks_until_release() {
    let fs = MemoryFileSystem::new();
    let pool = pool(&fs, PoolLimit::Bounded(2), 5);

    let first = pool.acquire().await.unwrap();
    let _second = pool.acquire().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    first.release().await;
    let third = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(third.is_connected());
    assert_eq!(fs.connect_count(), 2);
}

#[tokio::test]
async fn test_bounded_pool_times_out() {
    let fs = MemoryFileSystem::new();
    let pool = pool(&fs, PoolLimit::Bounded(1), 5)
        .with_acquire_timeout(Duration::from_millis(50));

    let _held = pool.acquire().await.unwrap();
    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, TransferError::Timeout(_)));
}

#[tokio::test]
async fn test_bound_holds_under_contention() {
    let fs = MemoryFileSystem::new();
    let pool = pool(&fs, PoolLimit::Bounded(3), 10);
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let pool = pool.clone();
        let current = current.clone();
        let peak = peak.clone();
        handles.push(tokio::spawn(async move {
            let session = pool.acquire().await.unwrap();
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            session.release().await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(fs.connect_count() <= 3);
    assert_eq!(pool.stats().snapshot().in_use_count, 0);
}

#[tokio::test]
async fn test_disabled_pool_connects_every_time() {
    let fs = MemoryFileSystem::new();
    let pool = pool(&fs, PoolLimit::Disabled, 5);

    for _ in 0..3 {
        pool.acquire().await.unwrap().release().await;
    }

    assert_eq!(fs.connect_count(), 3);
    assert_eq!(fs.open_sessions(), 0);
}

#[tokio::test]
async fn test_broken_sessions_are_not_reused() {
    let fs = MemoryFileSystem::new();
    let pool = pool(&fs, PoolLimit::Unbounded, 5);

    pool.acquire().await.unwrap().release().await;
    fs.disconnect_all();

    let session = pool.acquire().await.unwrap();
    assert!(session.is_connected());
    assert_eq!(fs.connect_count(), 2);
    session.release().await;
}

#[tokio::test]
async fn test_concurrent_ensure_directory() {
    let fs = MemoryFileSystem::new();
    fs.add_dir("/data");
    let coordinator = coordinator(&fs);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            let mut session = coordinator
                .acquire(&endpoint("/data"), PoolLimit::Unbounded)
                .await?;
            let result = coordinator
                .ensure_directory(&mut session, "/data", "staging")
                .await;
            session.finish().await;
            result
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(fs.dir_exists("/data/staging"));
}
