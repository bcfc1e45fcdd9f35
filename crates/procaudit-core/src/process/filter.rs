use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

use super::ProcessTree;
use crate::Pid;

/// The process a lifecycle event refers to, as seen by the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessRef {
    pub pid: Pid,
    pub ppid: Option<Pid>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("a process tree is required when filtering by ancestor or descendant PIDs")]
    TreeRequired,
}

/// Subscriber interest in a subset of processes.
///
/// An empty filter matches everything. Clauses are evaluated in order
/// pids, ppids, ancestors, descendants; the first failing non-empty
/// clause rejects the process. Ancestor and descendant clauses need a
/// [`ProcessTree`]; calling `matches` with those clauses set and no tree
/// is a caller error.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessFilter {
    #[serde(skip_serializing_if = "HashSet::is_empty")]
    pub pids: HashSet<Pid>,
    #[serde(skip_serializing_if = "HashSet::is_empty")]
    pub ppids: HashSet<Pid>,
    #[serde(skip_serializing_if = "HashSet::is_empty")]
    pub ancestor_pids: HashSet<Pid>,
    #[serde(skip_serializing_if = "HashSet::is_empty")]
    pub descendant_pids: HashSet<Pid>,
}

impl ProcessFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
            && self.ppids.is_empty()
            && self.ancestor_pids.is_empty()
            && self.descendant_pids.is_empty()
    }

    pub fn add_pids(&mut self, pids: impl IntoIterator<Item = Pid>) {
        self.pids.extend(pids);
    }

    pub fn add_ppids(&mut self, ppids: impl IntoIterator<Item = Pid>) {
        self.ppids.extend(ppids);
    }

    pub fn add_ancestor_pids(&mut self, pids: impl IntoIterator<Item = Pid>) {
        self.ancestor_pids.extend(pids);
    }

    pub fn add_descendant_pids(&mut self, pids: impl IntoIterator<Item = Pid>) {
        self.descendant_pids.extend(pids);
    }

    /// Union another filter into this one. Must not run concurrently with
    /// `matches`; merge subscriptions at setup time.
    pub fn merge(&mut self, other: &ProcessFilter) {
        self.pids.extend(&other.pids);
        self.ppids.extend(&other.ppids);
        self.ancestor_pids.extend(&other.ancestor_pids);
        self.descendant_pids.extend(&other.descendant_pids);
    }

    pub fn matches(
        &self,
        process: &ProcessRef,
        tree: Option<&ProcessTree>,
    ) -> Result<bool, FilterError> {
        if !self.pids.is_empty() && !self.pids.contains(&process.pid) {
            return Ok(false);
        }
        if !self.ppids.is_empty() {
            // An unresolvable PPID never matches a PPID clause.
            match process.ppid {
                Some(ppid) if self.ppids.contains(&ppid) => {}
                _ => return Ok(false),
            }
        }
        if !self.ancestor_pids.is_empty() || !self.descendant_pids.is_empty() {
            let tree = tree.ok_or(FilterError::TreeRequired)?;
            if !self.ancestor_pids.is_empty() {
                let ancestors = tree.ancestor_pids(process.pid);
                if !self.ancestor_pids.iter().any(|pid| ancestors.contains(pid)) {
                    return Ok(false);
                }
            }
            if !self.descendant_pids.is_empty() {
                let descendants = tree.descendant_pids(process.pid);
                if !self
                    .descendant_pids
                    .iter()
                    .any(|pid| descendants.contains(pid))
                {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}
