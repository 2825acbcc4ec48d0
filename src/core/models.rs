//! Data models for the process lifecycle core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

/// One process in an enumerated tree.
///
/// Built fresh for every termination request and dropped right after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessNode {
    pub pid: u32,
    pub ppid: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ProcessNode>,
}

impl ProcessNode {
    pub fn new(pid: u32, ppid: u32) -> Self {
        Self {
            pid,
            ppid,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<ProcessNode>) -> Self {
        self.children = children;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of processes in the tree, root included.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(ProcessNode::count).sum::<usize>()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.pid == pid || self.children.iter().any(|child| child.contains(pid))
    }

    /// Pids in pre-order, root first.
    pub fn pids(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.count());
        self.collect_pre_order(&mut out);
        out
    }

    /// Pids in post-order: every child appears before its parent.
    pub fn leaves_first(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.count());
        self.collect_post_order(&mut out);
        out
    }

    fn collect_pre_order(&self, out: &mut Vec<u32>) {
        out.push(self.pid);
        for child in &self.children {
            child.collect_pre_order(out);
        }
    }

    fn collect_post_order(&self, out: &mut Vec<u32>) {
        for child in &self.children {
            child.collect_post_order(out);
        }
        out.push(self.pid);
    }

    /// Checks that no pid appears twice and that every child points back at its parent.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        self.validate_inner(&mut seen)
    }

    fn validate_inner(&self, seen: &mut HashSet<u32>) -> Result<(), String> {
        if !seen.insert(self.pid) {
            return Err(format!("pid {} appears more than once", self.pid));
        }
        for child in &self.children {
            if child.ppid != self.pid {
                return Err(format!(
                    "pid {} lists parent {} but sits under {}",
                    child.pid, child.ppid, self.pid
                ));
            }
            child.validate_inner(seen)?;
        }
        Ok(())
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(f, "{}{}", "  ".repeat(depth), self.pid)?;
        for child in &self.children {
            child.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for ProcessNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

/// Lifecycle state of the managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ProcessState {
    /// Anything but `Stopped` means an instance may still exist.
    pub fn is_active(self) -> bool {
        self != ProcessState::Stopped
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Stopping => "stopping",
        };
        f.write_str(label)
    }
}

/// Read-only view of the currently managed process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagedProcessInfo {
    pub pid: u32,
    pub state: ProcessState,
    pub program: PathBuf,
    pub started_at: DateTime<Utc>,
    /// Increments on every successful spawn.
    pub generation: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> ProcessNode {
        // root -> {A, B}, A -> {C}
        ProcessNode::new(10, 1).with_children(vec![
            ProcessNode::new(11, 10).with_children(vec![ProcessNode::new(13, 11)]),
            ProcessNode::new(12, 10),
        ])
    }

    #[test]
    fn test_traversal_orders() {
        let tree = sample();
        assert_eq!(tree.count(), 4);
        assert_eq!(tree.pids(), vec![10, 11, 13, 12]);
        assert_eq!(tree.leaves_first(), vec![13, 11, 12, 10]);
        assert!(tree.contains(13));
        assert!(!tree.contains(99));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_bad_parents() {
        assert!(sample().validate().is_ok());

        let dup = ProcessNode::new(10, 1)
            .with_children(vec![ProcessNode::new(11, 10), ProcessNode::new(11, 10)]);
        assert!(dup.validate().unwrap_err().contains("more than once"));

        let orphan = ProcessNode::new(10, 1).with_children(vec![ProcessNode::new(11, 7)]);
        assert!(orphan.validate().is_err());
    }

    #[test]
    fn test_display_indents_children() {
        assert_eq!(sample().to_string(), "10\n  11\n    13\n  12\n");
    }

    #[test]
    fn test_state_activity() {
        assert!(!ProcessState::Stopped.is_active());
        assert!(ProcessState::Starting.is_active());
        assert!(ProcessState::Stopping.is_active());
        assert_eq!(ProcessState::default(), ProcessState::Stopped);
        assert_eq!(ProcessState::Running.to_string(), "running");
    }
}
