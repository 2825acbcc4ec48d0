//! Process tree discovery module
//!
//! Walks downward from a root pid, asking the OS for each node's direct
//! children. The walk itself is platform-agnostic; the per-level lookup is
//! a `ChildQuery` strategy chosen at the edge.
//!
//! Platform strategy:
//! - Windows: no walk at all, `taskkill /T` kills the subtree natively
//! - macOS/BSD: `pgrep -P <pid>`
//! - Linux: `ps -o pid --no-headers --ppid <pid>`
//! - `procfs`: in-process snapshot (psutil on Linux, sysinfo on Windows)

use crate::core::models::ProcessNode;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, warn};

/// Guard against pathological nesting (or a lookup that keeps inventing children).
pub const MAX_TREE_DEPTH: usize = 128;

#[derive(Error, Debug)]
pub enum ProcessTreeError {
    #[error("Failed to run `{tool}`: {source}")]
    QueryTool {
        tool: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("`{tool}` failed for pid {pid}: {message}")]
    QueryFailed {
        tool: &'static str,
        pid: u32,
        message: String,
    },
    #[error("Failed to get process information: {0}")]
    ProcessInfo(String),
    #[error("Process not found: {0}")]
    ProcessNotFound(u32),
    #[error("Permission denied accessing process: {0}")]
    PermissionDenied(u32),
    #[error("Unsupported platform")]
    UnsupportedPlatform,
}

impl ProcessTreeError {
    /// The target is already gone, which every caller treats as success.
    pub fn is_already_exited(&self) -> bool {
        matches!(self, ProcessTreeError::ProcessNotFound(_))
    }
}

/// Lists the direct children of a process.
pub trait ChildQuery: Send + Sync {
    fn name(&self) -> &'static str;

    fn children_of(&self, pid: u32) -> Result<Vec<u32>, ProcessTreeError>;
}

/// BSD-style lookup (`pgrep -P`), used on macOS.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgrepQuery;

impl ChildQuery for PgrepQuery {
    fn name(&self) -> &'static str {
        "pgrep"
    }

    fn children_of(&self, pid: u32) -> Result<Vec<u32>, ProcessTreeError> {
        run_query("pgrep", &["-P".to_string(), pid.to_string()], pid)
    }
}

/// Linux-style lookup (`ps --ppid`).
#[derive(Debug, Clone, Copy, Default)]
pub struct PsQuery;

impl ChildQuery for PsQuery {
    fn name(&self) -> &'static str {
        "ps"
    }

    fn children_of(&self, pid: u32) -> Result<Vec<u32>, ProcessTreeError> {
        run_query(
            "ps",
            &[
                "-o".to_string(),
                "pid".to_string(),
                "--no-headers".to_string(),
                "--ppid".to_string(),
                pid.to_string(),
            ],
            pid,
        )
    }
}

fn run_query(tool: &'static str, args: &[String], pid: u32) -> Result<Vec<u32>, ProcessTreeError> {
    let output = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|source| ProcessTreeError::QueryTool { tool, source })?;

    if output.status.success() {
        return Ok(parse_pid_list(&String::from_utf8_lossy(&output.stdout)));
    }

    // Both tools exit 1 when nothing matched.
    if output.status.code() == Some(1) {
        return Ok(Vec::new());
    }

    Err(ProcessTreeError::QueryFailed {
        tool,
        pid,
        message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Extracts every run of digits from tool output.
pub fn parse_pid_list(output: &str) -> Vec<u32> {
    output
        .split(|c: char| !c.is_ascii_digit())
        .filter(|token| !token.is_empty())
        .filter_map(|token| token.parse().ok())
        .collect()
}

/// Which child lookup to use; `auto` picks per platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeQuery {
    #[default]
    Auto,
    Ps,
    Pgrep,
    Procfs,
}

impl std::str::FromStr for TreeQuery {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(TreeQuery::Auto),
            "ps" => Ok(TreeQuery::Ps),
            "pgrep" => Ok(TreeQuery::Pgrep),
            "procfs" => Ok(TreeQuery::Procfs),
            other => Err(format!(
                "unknown tree query `{other}` (expected auto, ps, pgrep or procfs)"
            )),
        }
    }
}

/// How a process tree gets torn down on this host.
pub enum TreeStrategy {
    /// The OS kills the whole subtree in one request.
    NativeTreeKill,
    /// Enumerate with the given lookup, then kill node by node.
    Walk(Box<dyn ChildQuery>),
}

impl TreeStrategy {
    pub fn for_current_platform() -> Self {
        Self::from_query(TreeQuery::Auto)
    }

    pub fn from_query(query: TreeQuery) -> Self {
        match query {
            TreeQuery::Auto => {
                if cfg!(windows) {
                    TreeStrategy::NativeTreeKill
                } else if cfg!(any(
                    target_os = "macos",
                    target_os = "ios",
                    target_os = "freebsd",
                    target_os = "openbsd",
                    target_os = "netbsd",
                    target_os = "dragonfly"
                )) {
                    TreeStrategy::Walk(Box::new(PgrepQuery))
                } else {
                    TreeStrategy::Walk(Box::new(PsQuery))
                }
            }
            TreeQuery::Ps => TreeStrategy::Walk(Box::new(PsQuery)),
            TreeQuery::Pgrep => TreeStrategy::Walk(Box::new(PgrepQuery)),
            TreeQuery::Procfs => TreeStrategy::Walk(crate::platform::system_query()),
        }
    }

    /// Lookup for diagnostics; native strategies fall back to the in-process snapshot.
    pub fn child_query(&self) -> Box<dyn ChildQuery + '_> {
        match self {
            TreeStrategy::NativeTreeKill => crate::platform::system_query(),
            TreeStrategy::Walk(query) => Box::new(BorrowedQuery(query.as_ref())),
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            TreeStrategy::NativeTreeKill => "native",
            TreeStrategy::Walk(query) => query.name(),
        }
    }
}

impl std::fmt::Debug for TreeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TreeStrategy({})", self.describe())
    }
}

struct BorrowedQuery<'a>(&'a dyn ChildQuery);

impl ChildQuery for BorrowedQuery<'_> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn children_of(&self, pid: u32) -> Result<Vec<u32>, ProcessTreeError> {
        self.0.children_of(pid)
    }
}

/// Discovers every descendant of `root_pid`.
///
/// A failed lookup counts as "no children": the caller is usually tearing
/// things down and must keep going with whatever was found.
pub fn enumerate(query: &dyn ChildQuery, root_pid: u32, root_ppid: u32) -> ProcessNode {
    let mut seen = HashSet::new();
    seen.insert(root_pid);
    build_node(query, root_pid, root_ppid, 0, &mut seen)
}

fn build_node(
    query: &dyn ChildQuery,
    pid: u32,
    ppid: u32,
    depth: usize,
    seen: &mut HashSet<u32>,
) -> ProcessNode {
    if depth >= MAX_TREE_DEPTH {
        warn!(
            "Process tree below pid {} exceeds depth {}; not descending further",
            pid, MAX_TREE_DEPTH
        );
        return ProcessNode::new(pid, ppid);
    }

    let child_pids = match query.children_of(pid) {
        Ok(pids) => pids,
        Err(err) => {
            log_lookup_failure(query.name(), pid, &err);
            Vec::new()
        }
    };

    let fresh: Vec<u32> = child_pids
        .into_iter()
        .filter(|child| *child != 0 && seen.insert(*child))
        .collect();

    let children = fresh
        .into_iter()
        .map(|child| build_node(query, child, pid, depth + 1, seen))
        .collect();

    ProcessNode::new(pid, ppid).with_children(children)
}

fn log_lookup_failure(tool: &str, pid: u32, err: &ProcessTreeError) {
    match err {
        ProcessTreeError::PermissionDenied(_) => {
            warn!("{} lookup for pid {} denied; treating as leaf: {}", tool, pid, err)
        }
        _ => debug!("{} lookup for pid {} failed; treating as leaf: {}", tool, pid, err),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    /// In-memory process table.
    pub(crate) struct TableQuery {
        pub children: HashMap<u32, Vec<u32>>,
        pub failing: HashSet<u32>,
    }

    impl TableQuery {
        pub(crate) fn new(edges: &[(u32, &[u32])]) -> Self {
            Self {
                children: edges
                    .iter()
                    .map(|(parent, kids)| (*parent, kids.to_vec()))
                    .collect(),
                failing: HashSet::new(),
            }
        }
    }

    impl ChildQuery for TableQuery {
        fn name(&self) -> &'static str {
            "table"
        }

        fn children_of(&self, pid: u32) -> Result<Vec<u32>, ProcessTreeError> {
            if self.failing.contains(&pid) {
                return Err(ProcessTreeError::PermissionDenied(pid));
            }
            match self.children.get(&pid) {
                Some(kids) => Ok(kids.clone()),
                None => Err(ProcessTreeError::ProcessNotFound(pid)),
            }
        }
    }

    #[test]
    fn test_enumerate_synthetic_tree() {
        let query = TableQuery::new(&[(100, &[101, 102]), (101, &[103]), (102, &[]), (103, &[])]);
        let tree = enumerate(&query, 100, 1);

        let expected = ProcessNode::new(100, 1).with_children(vec![
            ProcessNode::new(101, 100).with_children(vec![ProcessNode::new(103, 101)]),
            ProcessNode::new(102, 100),
        ]);
        assert_eq!(tree, expected);
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn test_failed_lookup_is_a_leaf() {
        let mut query = TableQuery::new(&[(100, &[101, 102]), (101, &[103])]);
        query.failing.insert(101);

        let tree = enumerate(&query, 100, 1);
        assert_eq!(tree.pids(), vec![100, 101, 102]);
        assert!(tree.children.iter().all(ProcessNode::is_leaf));
    }

    #[test]
    fn test_missing_root_yields_single_node() {
        let query = TableQuery::new(&[]);
        let tree = enumerate(&query, 4242, 1);
        assert_eq!(tree, ProcessNode::new(4242, 1));
    }

    #[test]
    fn test_repeated_pids_are_visited_once() {
        // A lookup that reports the same pid under two parents, and a self-loop.
        let query = TableQuery::new(&[(1, &[2, 3]), (2, &[4, 2]), (3, &[4, 1]), (4, &[])]);
        let tree = enumerate(&query, 1, 0);

        assert!(tree.validate().is_ok());
        let mut pids = tree.pids();
        pids.sort_unstable();
        assert_eq!(pids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_parse_pid_list() {
        assert_eq!(parse_pid_list("  123\n 456\n"), vec![123, 456]);
        assert_eq!(parse_pid_list(""), Vec::<u32>::new());
        assert_eq!(parse_pid_list("pid 7, pid 8"), vec![7, 8]);
    }

    #[test]
    fn test_tree_query_from_str() {
        assert_eq!("PS".parse::<TreeQuery>(), Ok(TreeQuery::Ps));
        assert_eq!("procfs".parse::<TreeQuery>(), Ok(TreeQuery::Procfs));
        assert!("wmic".parse::<TreeQuery>().is_err());
    }

    #[test]
    fn test_platform_strategy_shape() {
        let strategy = TreeStrategy::for_current_platform();
        if cfg!(windows) {
            assert_eq!(strategy.describe(), "native");
        } else if cfg!(target_os = "linux") {
            assert_eq!(strategy.describe(), "ps");
        } else if cfg!(target_os = "macos") {
            assert_eq!(strategy.describe(), "pgrep");
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_system_query_finds_spawned_child() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");

        let query = crate::platform::system_query();
        let tree = enumerate(query.as_ref(), std::process::id(), 0);
        let found = tree.contains(child.id());

        let _ = child.kill();
        let _ = child.wait();
        assert!(found, "spawned child should be discovered under the test process");
    }
}
