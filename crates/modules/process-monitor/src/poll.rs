use std::{
    collections::HashSet,
    num::NonZeroUsize,
    sync::Arc,
    time::Duration,
};

use lru::LruCache;
use procaudit_core::{
    process::{InspectorError, ProcessInspector},
    shutdown::{CleanExit, ShutdownSignal},
    source::{fields, NoticeKind, RawNotice},
    Pid,
};
use tokio::sync::mpsc;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Bound on the remembered-PID set. Eviction of a still-running PID
/// causes a duplicate start on re-observation; the polling path is
/// at-least-once by design.
const KNOWN_SET_CAPACITY: usize = 65_536;

/// Degraded event source used when kernel tracing is unavailable.
///
/// Each tick snapshots the full process list and emits a synthetic
/// start notice for every previously-unknown PID. Stops are never
/// observed, and a process that lives entirely within one interval is
/// invisible.
pub struct PollEventSource {
    inspector: Arc<dyn ProcessInspector>,
    interval: Duration,
    known: LruCache<Pid, ()>,
}

impl PollEventSource {
    /// Snapshots the running processes to seed the known set, so that
    /// the processes already running at monitor start are not reported
    /// as new.
    pub fn new(
        inspector: Arc<dyn ProcessInspector>,
        interval: Duration,
    ) -> Result<Self, InspectorError> {
        let capacity = NonZeroUsize::new(KNOWN_SET_CAPACITY).expect("nonzero capacity");
        let mut known = LruCache::new(capacity);
        let snapshot = inspector.list_all()?;
        for record in &snapshot {
            known.put(record.pid, ());
        }
        log::info!(
            "poll source seeded with {} running processes (interval: {:?})",
            known.len(),
            interval
        );
        Ok(Self {
            inspector,
            interval,
            known,
        })
    }

    /// One snapshot-and-diff pass.
    pub fn poll_once(&mut self) -> Vec<RawNotice> {
        let snapshot = match self.inspector.list_all() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("process snapshot failed, skipping poll tick: {e}");
                return Vec::new();
            }
        };

        let mut notices = Vec::new();
        let mut seen = HashSet::with_capacity(snapshot.len());
        for record in snapshot {
            seen.insert(record.pid);
            if self.known.get(&record.pid).is_some() {
                continue;
            }
            if self.known.len() == KNOWN_SET_CAPACITY {
                log::warn!("known-PID set is full, evicting; duplicate starts are possible");
            }
            self.known.put(record.pid, ());

            let mut notice = RawNotice::new(record.pid, NoticeKind::Start);
            if let Some(ppid) = record.ppid {
                notice = notice.with_field(fields::PPID, ppid.to_string());
            }
            if let Some(start_time) = record.start_time {
                notice = notice.with_field(fields::CREATE_TIME, start_time.to_rfc3339());
            }
            notices.push(notice);
        }

        // Forget vanished PIDs so that a reused PID is reported again.
        let vanished: Vec<Pid> = self
            .known
            .iter()
            .map(|(pid, _)| *pid)
            .filter(|pid| !seen.contains(pid))
            .collect();
        for pid in vanished {
            self.known.pop(&pid);
        }

        notices
    }

    pub async fn run(
        mut self,
        tx: mpsc::Sender<RawNotice>,
        mut shutdown: ShutdownSignal,
    ) -> CleanExit {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                exit = shutdown.recv() => return exit,
                _ = ticker.tick() => {}
            }
            for notice in self.poll_once() {
                tokio::select! {
                    exit = shutdown.recv() => return exit,
                    sent = tx.send(notice) => {
                        if sent.is_err() {
                            // Receiver gone; the pipeline is unwinding.
                            return shutdown.recv().await;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeInspector;

    #[test]
    fn initial_snapshot_is_not_reported() {
        let inspector = FakeInspector::default();
        inspector.insert(1, None, "init");
        inspector.insert(2, Some(1), "daemon");
        let mut source =
            PollEventSource::new(Arc::new(inspector), DEFAULT_POLL_INTERVAL).unwrap();
        assert!(source.poll_once().is_empty());
    }

    #[test]
    fn one_start_per_newly_observed_pid() {
        let inspector = FakeInspector::default();
        inspector.insert(1, None, "init");
        inspector.insert(2, Some(1), "daemon");
        let shared = Arc::new(inspector);
        let mut source = PollEventSource::new(shared.clone(), DEFAULT_POLL_INTERVAL).unwrap();

        shared.insert(3, Some(1), "child");
        let notices = source.poll_once();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].pid, 3);
        assert_eq!(notices[0].kind, NoticeKind::Start);
        assert_eq!(notices[0].fields.get(fields::PPID).unwrap(), "1");

        // Still known on the next tick.
        assert!(source.poll_once().is_empty());
    }

    #[test]
    fn reused_pid_is_reported_again() {
        let inspector = FakeInspector::default();
        inspector.insert(1, None, "init");
        inspector.insert(7, Some(1), "short-lived");
        let shared = Arc::new(inspector);
        let mut source = PollEventSource::new(shared.clone(), DEFAULT_POLL_INTERVAL).unwrap();

        shared.remove(7);
        assert!(source.poll_once().is_empty());

        shared.insert(7, Some(1), "replacement");
        let notices = source.poll_once();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].pid, 7);
    }

    #[test]
    fn snapshot_failure_skips_the_tick() {
        let inspector = FakeInspector::default();
        inspector.insert(1, None, "init");
        let shared = Arc::new(inspector);
        let mut source = PollEventSource::new(shared.clone(), DEFAULT_POLL_INTERVAL).unwrap();

        shared.fail_listing(true);
        assert!(source.poll_once().is_empty());

        // Recovered snapshots pick up where the known set left off.
        shared.fail_listing(false);
        shared.insert(2, Some(1), "late");
        let notices = source.poll_once();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].pid, 2);
    }
}
