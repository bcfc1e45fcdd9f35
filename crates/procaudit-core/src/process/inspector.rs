use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::Pid;

/// One-shot and bulk process metadata lookup.
///
/// The pipeline treats this as an opaque capability: lookups race the
/// inspected process's own exit, so `NotFound` is an expected outcome
/// and callers degrade to partial events instead of failing.
pub trait ProcessInspector: Send + Sync {
    fn get_one(&self, pid: Pid) -> Result<ProcessRecord, InspectorError>;

    fn list_all(&self) -> Result<Vec<ProcessRecord>, InspectorError>;

    /// Path of the executable backing `pid`, if it can still be resolved.
    fn executable_path(&self, pid: Pid) -> Option<PathBuf>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: Pid,
    pub ppid: Option<Pid>,
    pub name: String,
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum InspectorError {
    #[error("process {0} not found")]
    NotFound(Pid),
    #[error("process listing failed: {0}")]
    Listing(String),
}

/// Inspector backed by /proc.
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcfsInspector;

#[cfg(target_os = "linux")]
impl ProcfsInspector {
    pub fn new() -> Self {
        Self
    }

    fn record(process: &procfs::process::Process) -> Result<ProcessRecord, InspectorError> {
        let stat = process
            .stat()
            .map_err(|_| InspectorError::NotFound(process.pid()))?;
        Ok(ProcessRecord {
            pid: process.pid(),
            ppid: (stat.ppid != 0).then_some(stat.ppid),
            name: stat.comm,
            start_time: None,
        })
    }
}

#[cfg(target_os = "linux")]
impl ProcessInspector for ProcfsInspector {
    fn get_one(&self, pid: Pid) -> Result<ProcessRecord, InspectorError> {
        let process =
            procfs::process::Process::new(pid).map_err(|_| InspectorError::NotFound(pid))?;
        Self::record(&process)
    }

    fn list_all(&self) -> Result<Vec<ProcessRecord>, InspectorError> {
        let processes =
            procfs::process::all_processes().map_err(|e| InspectorError::Listing(e.to_string()))?;
        // Processes that exit mid-walk are skipped, not errors.
        Ok(processes
            .filter_map(|process| process.ok())
            .filter_map(|process| Self::record(&process).ok())
            .collect())
    }

    fn executable_path(&self, pid: Pid) -> Option<PathBuf> {
        procfs::process::Process::new(pid).ok()?.exe().ok()
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn lists_and_finds_the_current_process() {
        let inspector = ProcfsInspector::new();
        let me = std::process::id() as Pid;

        let record = inspector.get_one(me).unwrap();
        assert_eq!(record.pid, me);
        assert!(record.ppid.is_some());
        assert!(!record.name.is_empty());

        let all = inspector.list_all().unwrap();
        assert!(all.iter().any(|r| r.pid == me));
    }

    #[test]
    fn missing_process_is_not_found() {
        let inspector = ProcfsInspector::new();
        // PIDs wrap far below this value.
        assert!(matches!(
            inspector.get_one(i32::MAX - 1),
            Err(InspectorError::NotFound(_))
        ));
    }
}
