use std::{
    num::NonZeroUsize,
    time::{Duration, Instant},
};

use lru::LruCache;

use crate::Pid;

/// Default bound on tracked PIDs.
pub const DEFAULT_CAPACITY: usize = 10_000;
/// Default absolute lifetime of an entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy)]
struct Entry {
    ppid: Pid,
    expires_at: Instant,
}

/// Bounded, time-expiring PID -> PPID map.
///
/// Backfills the parent linkage for raw notices that omit it, which is
/// the norm for stop notices. Seeded from a full snapshot at startup,
/// updated on every start, removed eagerly on every stop. The capacity
/// bound and the per-entry TTL trade completeness for bounded memory
/// under PID churn; a miss yields an event with the PPID absent.
/// Expiry is enforced lazily on access.
#[derive(Debug)]
pub struct CorrelationCache {
    entries: LruCache<Pid, Entry>,
    ttl: Duration,
}

impl CorrelationCache {
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    pub fn with_settings(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one");
        Self {
            entries: LruCache::new(capacity),
            ttl,
        }
    }

    pub fn get(&mut self, pid: Pid) -> Option<Pid> {
        let entry = self.entries.get(&pid).copied()?;
        if entry.expires_at <= Instant::now() {
            self.entries.pop(&pid);
            return None;
        }
        Some(entry.ppid)
    }

    pub fn put(&mut self, pid: Pid, ppid: Pid) {
        let entry = Entry {
            ppid,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.put(pid, entry);
    }

    pub fn remove(&mut self, pid: Pid) {
        self.entries.pop(&pid);
    }

    /// Load a full `(pid, ppid)` snapshot, typically at monitor start.
    pub fn seed(&mut self, edges: impl IntoIterator<Item = (Pid, Pid)>) {
        for (pid, ppid) in edges {
            self.put(pid, ppid);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CorrelationCache {
    fn default() -> Self {
        Self::new()
    }
}
