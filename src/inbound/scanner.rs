//! Polling scanner
//!
//! One scanner watches one inbound endpoint. Every poll lists the endpoint
//! directory, drops names rejected by the filter and files that do not look
//! complete yet, then locks, retrieves and routes each remaining file. A
//! failing file never aborts the rest of the cycle.
//!
//! The scanner moves through `Stopped -> Polling -> Stopping -> Stopped`.
//! [`PollingScanner::stop`] is cooperative: the file being processed is
//! finished, the remaining ones are left for the next start.

use super::consumer::FileConsumer;
use super::filter::NameFilter;
use super::lock::{LocalLockFactory, LockFactory, DEFAULT_LOCK_TIMEOUT};
use super::retrieve::{retrieve, InboundFile};
use super::stability;
use crate::config::{EndpointAddress, TransferPolicy};
use crate::coordinator::TransferCoordinator;
use crate::error::{Result, TransferError};
use crate::helper::RetryConfig;
use crate::session::{path, FileDescriptor, RemoteFileSession, SessionFactory};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause between attempts of [`PollingScanner::request`]
const REQUEST_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Lifecycle state of a scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScannerState {
    /// Not running
    Stopped = 0,
    /// Polling on schedule
    Polling = 1,
    /// Finishing the current file before stopping
    Stopping = 2,
}

impl ScannerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ScannerState::Polling,
            2 => ScannerState::Stopping,
            _ => ScannerState::Stopped,
        }
    }
}

/// Outcome of one poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Files listed
    pub listed: usize,
    /// Files rejected by the name filter
    pub filtered: usize,
    /// Files that did not look complete
    pub deferred: usize,
    /// Files locked by another poller
    pub skipped_locked: usize,
    /// Files gone before they could be retrieved
    pub vanished: usize,
    /// Files handed to the consumer successfully
    pub routed: usize,
    /// Files that failed to retrieve or were rejected
    pub failed: usize,
}

/// Watches one inbound endpoint
pub struct PollingScanner<F: SessionFactory> {
    coordinator: Arc<TransferCoordinator<F>>,
    endpoint: EndpointAddress,
    policy: TransferPolicy,
    filter: NameFilter,
    consumer: Arc<dyn FileConsumer>,
    locks: Arc<dyn LockFactory>,
    lock_timeout: Duration,
    retry: RetryConfig,
    state: AtomicU8,
    wake: Notify,
}

impl<F: SessionFactory> fmt::Debug for PollingScanner<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingScanner")
            .field("endpoint", &self.endpoint.to_string())
            .field("state", &self.state())
            .finish()
    }
}

impl<F: SessionFactory> PollingScanner<F> {
    /// Create a stopped scanner delivering to `consumer`
    pub fn new(
        coordinator: Arc<TransferCoordinator<F>>,
        endpoint: EndpointAddress,
        policy: TransferPolicy,
        consumer: Arc<dyn FileConsumer>,
    ) -> Self {
        let filter = NameFilter::new(policy.file_filter.as_deref());
        PollingScanner {
            coordinator,
            endpoint,
            policy,
            filter,
            consumer,
            locks: Arc::new(LocalLockFactory::new()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            retry: RetryConfig::default(),
            state: AtomicU8::new(ScannerState::Stopped as u8),
            wake: Notify::new(),
        }
    }

    /// Share file locks with other scanners
    pub fn with_lock_factory(mut self, locks: Arc<dyn LockFactory>) -> Self {
        self.locks = locks;
        self
    }

    /// Set the wait for a file lock
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the backoff used after failed polls
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Watched endpoint
    pub fn endpoint(&self) -> &EndpointAddress {
        &self.endpoint
    }

    /// Current state
    pub fn state(&self) -> ScannerState {
        ScannerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn is_stopping(&self) -> bool {
        self.state() == ScannerState::Stopping
    }

    fn lock_key(&self, filename: &str) -> String {
        format!(
            "{}:{}",
            self.coordinator.name(),
            path::join(self.endpoint.path(), filename)
        )
    }

    /// Run one poll cycle
    pub async fn poll(&self) -> Result<PollReport> {
        let mut report = PollReport::default();
        let candidates = self.candidates(&mut report).await?;

        for entry in &candidates {
            if self.is_stopping() {
                debug!("Scanner for {} stopping, leaving remaining files", self.endpoint);
                break;
            }
            let Some(mut file) = self.claim(entry, &mut report).await else {
                continue;
            };
            match self.route(&mut file).await {
                Ok(()) => report.routed += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!("Failed to route {}: {}", file.remote_path, e);
                }
            }
        }

        if report.routed > 0 || report.failed > 0 {
            info!(
                "Polled {}: {} routed, {} failed, {} deferred",
                self.endpoint, report.routed, report.failed, report.deferred
            );
        }
        Ok(report)
    }

    /// Retrieve the first complete file, polling until `timeout` elapses
    ///
    /// The caller owns the returned file and must close its stream. The file
    /// lock is held until the file is dropped.
    pub async fn request(&self, timeout: Duration) -> Result<Option<InboundFile<F>>> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut report = PollReport::default();
            for entry in &self.candidates(&mut report).await? {
                if let Some(file) = self.claim(entry, &mut report).await {
                    return Ok(Some(file));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(REQUEST_RETRY_INTERVAL.min(deadline - now)).await;
        }
    }

    /// List the endpoint and keep the files ready for pickup
    async fn candidates(&self, report: &mut PollReport) -> Result<Vec<FileDescriptor>> {
        let mut session = self
            .coordinator
            .acquire(&self.endpoint, self.policy.max_pool_size)
            .await?;

        let entries = match session.list(".", true, false).await {
            Ok(entries) => entries,
            Err(e) => {
                if e.is_connection_failure() {
                    self.coordinator.mark_disconnected();
                }
                session.finish_with_error(&e).await;
                return Err(e);
            }
        };
        report.listed = entries.len();

        let mut accepted = Vec::new();
        for entry in entries {
            if !self.filter.matches(&entry.filename) {
                report.filtered += 1;
                continue;
            }
            if !stability::is_complete(&mut *session, &entry.filename, &self.policy).await {
                report.deferred += 1;
                continue;
            }
            accepted.push(entry);
        }

        session.finish().await;
        Ok(accepted)
    }

    /// Lock and retrieve one file; `None` when it is taken or failed
    async fn claim(&self, entry: &FileDescriptor, report: &mut PollReport) -> Option<InboundFile<F>> {
        let key = self.lock_key(&entry.filename);
        let Some(lock) = self.locks.try_lock(&key, self.lock_timeout).await else {
            debug!("{} is locked by another poller", key);
            report.skipped_locked += 1;
            return None;
        };

        match retrieve(&self.coordinator, &self.endpoint, &self.policy, entry).await {
            Ok(file) => Some(file.with_lock(lock)),
            Err(TransferError::NotFound(_)) => {
                debug!("{} vanished before retrieval", key);
                report.vanished += 1;
                None
            }
            Err(e) => {
                warn!("Failed to retrieve {}: {}", key, e);
                report.failed += 1;
                None
            }
        }
    }

    /// Hand a retrieved file to the consumer and close it
    async fn route(&self, file: &mut InboundFile<F>) -> Result<()> {
        let result = self.consumer.route_file(file.delivery()).await;
        if result.is_err() && self.policy.keep_file_on_error {
            file.stream.mark_error_occurred();
        }
        file.stream.close().await?;
        result
    }

    /// Start polling every `frequency` on a background task
    ///
    /// Returns `None` when the scanner is already running.
    pub fn start(self: &Arc<Self>, frequency: Duration) -> Option<JoinHandle<()>> {
        if self
            .state
            .compare_exchange(
                ScannerState::Stopped as u8,
                ScannerState::Polling as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            warn!("Scanner for {} is already running", self.endpoint);
            return None;
        }

        let scanner = self.clone();
        Some(tokio::spawn(async move { scanner.run(frequency).await }))
    }

    /// Ask a running scanner to stop after the current file
    pub fn stop(&self) {
        if self
            .state
            .compare_exchange(
                ScannerState::Polling as u8,
                ScannerState::Stopping as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            info!("Stopping scanner for {}", self.endpoint);
            self.wake.notify_one();
        }
    }

    async fn run(&self, frequency: Duration) {
        info!("Scanner for {} started, polling every {:?}", self.endpoint, frequency);
        let mut failures: u32 = 0;

        while self.state() == ScannerState::Polling {
            let delay = match self.poll().await {
                Ok(_) => {
                    if failures > 0 {
                        info!("Polling {} recovered", self.endpoint);
                    }
                    failures = 0;
                    frequency
                }
                Err(e) => {
                    let backoff = self.retry.delay_for_attempt(failures);
                    failures = failures.saturating_add(1);
                    if failures > self.retry.max_retries {
                        error!("Polling {} failed {} times in a row: {}", self.endpoint, failures, e);
                    } else {
                        warn!("Polling {} failed: {}, retrying in {:?}", self.endpoint, e, backoff);
                    }
                    frequency.max(backoff)
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => {}
            }
        }

        self.state.store(ScannerState::Stopped as u8, Ordering::SeqCst);
        info!("Scanner for {} stopped", self.endpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credentials, PoolConfig, PoolLimit};
    use crate::inbound::Delivery;
    use crate::session::{MemoryFileSystem, MemorySessionFactory};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;

    #[derive(Debug, Default)]
    struct Recorder {
        routed: Mutex<Vec<(String, String)>>,
        reject: bool,
    }

    #[async_trait]
    impl FileConsumer for Recorder {
        async fn route_file(&self, delivery: Delivery<'_>) -> Result<()> {
            let mut content = String::new();
            delivery.reader.read_to_string(&mut content).await?;
            self.routed
                .lock()
                .unwrap()
                .push((delivery.original_filename.to_string(), content));
            if self.reject {
                return Err(TransferError::Validation("rejected".into()));
            }
            Ok(())
        }
    }

    fn scanner(
        fs: &MemoryFileSystem,
        policy: TransferPolicy,
        consumer: Arc<Recorder>,
    ) -> PollingScanner<MemorySessionFactory> {
        let coordinator = Arc::new(TransferCoordinator::new(
            "test",
            Arc::new(MemorySessionFactory::new(fs.clone())),
            PoolConfig::default(),
        ));
        let endpoint =
            EndpointAddress::new("mem", 22, "u", "/in", Credentials::Password("pw".into()));
        PollingScanner::new(coordinator, endpoint, policy, consumer)
    }

    fn policy() -> TransferPolicy {
        TransferPolicy {
            max_pool_size: PoolLimit::Bounded(2),
            ..TransferPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_poll_routes_and_deletes() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/in/a.txt", "A");
        fs.add_file("/in/b.csv", "B");
        fs.add_dir("/in/sub");
        let consumer = Arc::new(Recorder::default());
        let scanner = scanner(&fs, policy(), consumer.clone());

        let report = scanner.poll().await.unwrap();
        assert_eq!(report.listed, 2);
        assert_eq!(report.routed, 2);
        assert!(fs.files_in("/in").is_empty());
        assert!(fs.dir_exists("/in/sub"));

        let routed = consumer.routed.lock().unwrap().clone();
        assert_eq!(
            routed,
            vec![("a.txt".to_string(), "A".to_string()), ("b.csv".to_string(), "B".to_string())]
        );
    }

    #[tokio::test]
    async fn test_poll_applies_filter() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/in/a.txt", "A");
        fs.add_file("/in/b.csv", "B");
        let consumer = Arc::new(Recorder::default());
        let policy = TransferPolicy {
            file_filter: Some("*.csv".into()),
            ..policy()
        };
        let scanner = scanner(&fs, policy, consumer.clone());

        let report = scanner.poll().await.unwrap();
        assert_eq!(report.filtered, 1);
        assert_eq!(report.routed, 1);
        assert_eq!(fs.files_in("/in"), vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_poll_defers_young_files() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/in/old.txt", "old");
        fs.set_mtime("/in/old.txt", 1);
        fs.add_file("/in/new.txt", "new");
        let consumer = Arc::new(Recorder::default());
        let policy = TransferPolicy {
            file_age: Some(Duration::from_secs(600)),
            ..policy()
        };
        let scanner = scanner(&fs, policy, consumer.clone());

        let report = scanner.poll().await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(report.routed, 1);
        assert_eq!(fs.files_in("/in"), vec!["new.txt"]);
    }

    #[tokio::test]
    async fn test_rejected_file_is_kept() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/in/a.txt", "A");
        let consumer = Arc::new(Recorder {
            reject: true,
            ..Recorder::default()
        });
        let scanner = scanner(&fs, policy(), consumer.clone());

        let report = scanner.poll().await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(fs.file_exists("/in/a.txt"));

        let stats = scanner.coordinator.pool_stats().await;
        assert_eq!(stats[0].1.in_use_count, 0);
    }

    #[tokio::test]
    async fn test_rejected_file_deleted_without_keep_on_error() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/in/a.txt", "A");
        let consumer = Arc::new(Recorder {
            reject: true,
            ..Recorder::default()
        });
        let policy = TransferPolicy {
            keep_file_on_error: false,
            ..policy()
        };
        let scanner = scanner(&fs, policy, consumer);

        scanner.poll().await.unwrap();
        assert!(!fs.file_exists("/in/a.txt"));
    }

    #[tokio::test]
    async fn test_listing_failure_marks_disconnected() {
        let fs = MemoryFileSystem::new();
        fs.add_dir("/in");
        fs.fail_listing(true);
        let scanner = scanner(&fs, policy(), Arc::new(Recorder::default()));

        let err = scanner.poll().await.unwrap_err();
        assert!(err.is_connection_failure());
        assert!(!scanner.coordinator.is_connected());
    }

    #[tokio::test]
    async fn test_listing_failure_discards_session() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/in/a.txt", "A");
        fs.fail_listing(true);
        let consumer = Arc::new(Recorder::default());
        let policy = TransferPolicy {
            max_pool_size: PoolLimit::Unbounded,
            ..TransferPolicy::default()
        };
        let scanner = scanner(&fs, policy, consumer.clone());

        scanner.poll().await.unwrap_err();
        let stats = scanner.coordinator.pool_stats().await[0].1.clone();
        assert_eq!(stats.idle_count, 0);
        assert_eq!(stats.total_destroyed, 1);
        assert_eq!(fs.open_sessions(), 0);

        fs.fail_listing(false);
        let report = scanner.poll().await.unwrap();
        assert_eq!(report.routed, 1);
        assert_eq!(fs.connect_count(), 2);
        assert!(scanner.coordinator.is_connected());
    }

    #[tokio::test]
    async fn test_locked_file_is_skipped() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/in/a.txt", "A");
        let locks = Arc::new(LocalLockFactory::new());
        let consumer = Arc::new(Recorder::default());
        let scanner = scanner(&fs, policy(), consumer.clone())
            .with_lock_factory(locks.clone())
            .with_lock_timeout(Duration::from_millis(10));

        let _held = locks.try_lock("test:/in/a.txt", DEFAULT_LOCK_TIMEOUT).await.unwrap();
        let report = scanner.poll().await.unwrap();
        assert_eq!(report.skipped_locked, 1);
        assert!(consumer.routed.lock().unwrap().is_empty());
        assert!(fs.file_exists("/in/a.txt"));
    }

    #[tokio::test]
    async fn test_request_returns_first_file() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/in/a.txt", "A");
        fs.add_file("/in/b.txt", "B");
        let scanner = scanner(&fs, policy(), Arc::new(Recorder::default()));

        let mut file = scanner.request(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(file.filename, "a.txt");
        let mut content = String::new();
        file.stream.read_to_string(&mut content).await.unwrap();
        assert_eq!(content, "A");
        file.stream.close().await.unwrap();
        assert_eq!(fs.files_in("/in"), vec!["b.txt"]);
    }

    #[tokio::test]
    async fn test_request_times_out_on_empty_directory() {
        let fs = MemoryFileSystem::new();
        fs.add_dir("/in");
        let scanner = scanner(&fs, policy(), Arc::new(Recorder::default()));

        assert!(scanner.request(Duration::from_millis(20)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let fs = MemoryFileSystem::new();
        fs.add_file("/in/a.txt", "A");
        let consumer = Arc::new(Recorder::default());
        let scanner = Arc::new(scanner(&fs, policy(), consumer.clone()));

        let handle = scanner.start(Duration::from_millis(10)).unwrap();
        assert_eq!(scanner.state(), ScannerState::Polling);
        assert!(scanner.start(Duration::from_millis(10)).is_none());

        tokio::time::sleep(Duration::from_millis(50)).await;
        scanner.stop();
        handle.await.unwrap();

        assert_eq!(scanner.state(), ScannerState::Stopped);
        assert_eq!(consumer.routed.lock().unwrap().len(), 1);
    }
}
