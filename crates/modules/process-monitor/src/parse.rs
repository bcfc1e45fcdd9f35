use std::sync::Arc;

use chrono::{DateTime, Utc};
use procaudit_core::{
    event::{Event, FileInfo, ProcessStartedData, ProcessStoppedData},
    process::{CorrelationCache, ProcessFilter, ProcessInspector, ProcessRef, ProcessTree},
    source::{fields, NoticeKind, RawNotice},
    Pid,
};

/// The parse/enrich stage. Exactly one instance runs per pipeline; it is
/// the single writer of the correlation cache and the process tree, so
/// neither needs synchronization of its own.
pub struct ParseStage {
    cache: CorrelationCache,
    tree: ProcessTree,
    filter: ProcessFilter,
    inspector: Arc<dyn ProcessInspector>,
}

impl ParseStage {
    pub fn new(
        filter: ProcessFilter,
        inspector: Arc<dyn ProcessInspector>,
        cache: CorrelationCache,
        tree: ProcessTree,
    ) -> Self {
        Self {
            cache,
            tree,
            filter,
            inspector,
        }
    }

    /// Turn a raw notice into a finished event, or `None` when the
    /// notice is of an unknown kind, fails to parse, or does not match
    /// the subscription filter. All of those are per-notice conditions;
    /// none stop the pipeline.
    pub fn process(&mut self, notice: RawNotice) -> Option<Event> {
        let pid = notice.pid;
        let time = notice.time.unwrap_or_else(Utc::now);

        let ppid = self.resolve_ppid(&notice);
        let executable = self
            .inspector
            .executable_path(pid)
            .map(|path| FileInfo::inspect(&path));
        let create_time = parse_time_field(&notice, fields::CREATE_TIME);

        let event = match notice.kind {
            NoticeKind::Start => {
                if let Some(ppid) = ppid {
                    self.cache.put(pid, ppid);
                    self.tree.add_process(pid, ppid);
                }
                Event::process_started(
                    time,
                    ProcessStartedData {
                        pid,
                        ppid,
                        create_time,
                        executable,
                    },
                )
            }
            NoticeKind::Stop => Event::process_stopped(
                time,
                ProcessStoppedData {
                    pid,
                    ppid,
                    create_time,
                    exit_time: parse_time_field(&notice, fields::EXIT_TIME),
                    exit_code: notice
                        .fields
                        .get(fields::EXIT_CODE)
                        .and_then(|raw| raw.parse().ok()),
                    executable,
                },
            ),
            NoticeKind::Other(kind) => {
                log::debug!("dropping notice of unknown kind {kind} for pid {pid}");
                return None;
            }
        };

        // Match against the lineage as it was when the event happened,
        // then forget stopped processes.
        let matched = self.matches(&ProcessRef { pid, ppid });
        if notice.kind == NoticeKind::Stop {
            self.cache.remove(pid);
            self.tree.remove_processes(&[pid]);
        }
        matched.then_some(event)
    }

    /// PPID resolution order: the notice itself, the correlation cache,
    /// then (for starts only) a live lookup that may race the process's
    /// own exit. Every step may come up empty; the event then carries no
    /// parent linkage.
    fn resolve_ppid(&mut self, notice: &RawNotice) -> Option<Pid> {
        if let Some(ppid) = notice
            .fields
            .get(fields::PPID)
            .and_then(|raw| raw.parse().ok())
        {
            return Some(ppid);
        }
        if let Some(ppid) = self.cache.get(notice.pid) {
            log::debug!(
                "resolved ppid from correlation cache (pid: {}, ppid: {ppid})",
                notice.pid
            );
            return Some(ppid);
        }
        if notice.kind == NoticeKind::Start {
            match self.inspector.get_one(notice.pid) {
                Ok(record) => return record.ppid,
                Err(e) => log::debug!("live ppid lookup failed for pid {}: {e}", notice.pid),
            }
        }
        None
    }

    fn matches(&self, process: &ProcessRef) -> bool {
        match self.filter.matches(process, Some(&self.tree)) {
            Ok(matched) => matched,
            Err(e) => {
                log::error!("filter evaluation failed for pid {}: {e}", process.pid);
                false
            }
        }
    }
}

fn parse_time_field(notice: &RawNotice, key: &str) -> Option<DateTime<Utc>> {
    let raw = notice.fields.get(key)?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(time) => Some(time.with_timezone(&Utc)),
        Err(e) => {
            log::debug!("unparseable {key} field {raw:?} on pid {}: {e}", notice.pid);
            None
        }
    }
}
