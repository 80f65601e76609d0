//! Idle pool entry
//!
//! Wraps a session sitting in the idle queue with its timing metadata.

use std::time::{Duration, Instant};

/// A pooled session with metadata
#[derive(Debug)]
pub struct IdleEntry<S> {
    /// The session
    pub(crate) session: S,
    /// When the session was created
    pub(crate) created_at: Instant,
    /// When the session was last returned
    pub(crate) last_used: Instant,
}

impl<S> IdleEntry<S> {
    /// Wrap a session returned at `created_at`
    pub fn new(session: S, created_at: Instant) -> Self {
        IdleEntry {
            session,
            created_at,
            last_used: Instant::now(),
        }
    }

    /// Check if the session sat idle longer than `idle_timeout`
    pub fn is_stale(&self, idle_timeout: Duration) -> bool {
        self.last_used.elapsed() > idle_timeout
    }

    /// Age of the session
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the session was returned
    pub fn idle_time(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Unwrap the session
    pub fn into_session(self) -> S {
        self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_entry_new() {
        let entry = IdleEntry::new(42, Instant::now());
        assert!(entry.age() < Duration::from_secs(1));
        assert!(entry.idle_time() < Duration::from_secs(1));
        assert_eq!(entry.into_session(), 42);
    }

    #[test]
    fn test_idle_entry_is_stale() {
        let entry = IdleEntry::new("s", Instant::now());
        assert!(!entry.is_stale(Duration::from_secs(1)));

        std::thread::sleep(Duration::from_millis(2));
        assert!(entry.is_stale(Duration::from_millis(1)));
    }

    #[test]
    fn test_idle_entry_keeps_creation_time() {
        let created = Instant::now();
        std::thread::sleep(Duration::from_millis(2));
        let entry = IdleEntry::new(0, created);
        assert!(entry.age() >= entry.idle_time());
    }
}
