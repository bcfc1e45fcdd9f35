use std::collections::HashMap;

use crate::Pid;

/// Forest of running processes keyed PID -> PPID.
///
/// Built from a full snapshot at monitor start, then kept current by the
/// parse stage as start/stop events are observed. Each PID maps to at
/// most one PPID and a parent is always observed before or at its
/// child's creation, so the structure is acyclic by construction.
/// Ancestor and descendant walks are bounded defensively anyway.
#[derive(Debug, Default, Clone)]
pub struct ProcessTree {
    parents: HashMap<Pid, Pid>,
}

impl ProcessTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from `(pid, ppid)` pairs, typically a full process
    /// list snapshot.
    pub fn from_edges(edges: impl IntoIterator<Item = (Pid, Pid)>) -> Self {
        Self {
            parents: edges.into_iter().collect(),
        }
    }

    pub fn add_process(&mut self, pid: Pid, ppid: Pid) {
        self.parents.insert(pid, ppid);
    }

    pub fn remove_processes(&mut self, pids: &[Pid]) {
        for pid in pids {
            self.parents.remove(pid);
        }
    }

    pub fn parent_pid(&self, pid: Pid) -> Option<Pid> {
        self.parents.get(&pid).copied()
    }

    pub fn child_pids(&self, pid: Pid) -> Vec<Pid> {
        self.parents
            .iter()
            .filter(|(_, ppid)| **ppid == pid)
            .map(|(child, _)| *child)
            .collect()
    }

    /// Ancestors of `pid` in child-to-root order.
    pub fn ancestor_pids(&self, pid: Pid) -> Vec<Pid> {
        let mut ancestors = Vec::new();
        let mut current = pid;
        // The walk cannot revisit a node in a well-formed forest; the
        // bound caps it if an inconsistent snapshot ever sneaks in.
        while let Some(ppid) = self.parent_pid(current) {
            if ancestors.len() >= self.parents.len() {
                log::warn!("ancestor walk from pid {pid} exceeded tree size, aborting");
                break;
            }
            ancestors.push(ppid);
            current = ppid;
        }
        ancestors
    }

    /// Transitive closure of children of `pid`.
    pub fn descendant_pids(&self, pid: Pid) -> Vec<Pid> {
        let mut descendants = Vec::new();
        let mut frontier = self.child_pids(pid);
        while let Some(child) = frontier.pop() {
            if descendants.len() >= self.parents.len() {
                log::warn!("descendant walk from pid {pid} exceeded tree size, aborting");
                break;
            }
            frontier.extend(self.child_pids(child));
            descendants.push(child);
        }
        descendants
    }

    /// Other children of the same parent.
    pub fn sibling_pids(&self, pid: Pid) -> Vec<Pid> {
        match self.parent_pid(pid) {
            Some(ppid) => self
                .child_pids(ppid)
                .into_iter()
                .filter(|child| *child != pid)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn is_descendant_of(&self, pid: Pid, ancestor: Pid) -> bool {
        self.ancestor_pids(pid).contains(&ancestor)
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Edges (1<-2), (2<-3): 1 is the root, 3 the leaf.
    fn chain() -> ProcessTree {
        ProcessTree::from_edges([(3, 2), (2, 1)])
    }

    #[test]
    fn ancestors_in_child_to_root_order() {
        assert_eq!(chain().ancestor_pids(3), vec![2, 1]);
    }

    #[test]
    fn descendants_are_transitive() {
        let mut descendants = chain().descendant_pids(1);
        descendants.sort_unstable();
        assert_eq!(descendants, vec![2, 3]);
    }

    #[test]
    fn unknown_pid_has_no_lineage() {
        let tree = chain();
        assert!(tree.ancestor_pids(99).is_empty());
        assert!(tree.descendant_pids(99).is_empty());
        assert_eq!(tree.parent_pid(99), None);
    }

    #[test]
    fn siblings_exclude_self() {
        let mut tree = chain();
        tree.add_process(4, 1);
        let siblings = tree.sibling_pids(2);
        assert_eq!(siblings, vec![4]);
        assert!(tree.sibling_pids(1).is_empty());
    }

    #[test]
    fn removal_detaches_subtree() {
        let mut tree = chain();
        tree.remove_processes(&[2]);
        assert_eq!(tree.ancestor_pids(3), vec![2]);
        assert!(tree.descendant_pids(1).is_empty());
    }

    #[test]
    fn incremental_updates() {
        let mut tree = ProcessTree::new();
        tree.add_process(2, 1);
        tree.add_process(3, 2);
        assert!(tree.is_descendant_of(3, 1));
        assert!(!tree.is_descendant_of(1, 3));
    }
}
