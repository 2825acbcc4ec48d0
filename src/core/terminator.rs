//! Best-effort termination of a whole process tree
//!
//! Nothing in here returns an error. Termination runs from exit handlers
//! and restart paths; a process that is already gone, or that we may not
//! signal, must not stop the rest of the teardown.

use crate::core::models::ProcessNode;
use crate::core::process_tree::{enumerate, ProcessTreeError, TreeQuery, TreeStrategy};
use crate::platform;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How hard to ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillMode {
    /// SIGTERM on Unix.
    Graceful,
    /// SIGKILL on Unix.
    Force,
}

/// Delivers kill requests. Swapped out in tests.
pub trait Signaller: Send + Sync {
    fn kill(&self, pid: u32, mode: KillMode) -> Result<(), ProcessTreeError>;

    fn kill_tree(&self, pid: u32, mode: KillMode) -> Result<(), ProcessTreeError>;

    fn is_alive(&self, pid: u32) -> bool {
        platform::process_alive(pid)
    }
}

/// Talks to the real OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSignaller;

impl Signaller for SystemSignaller {
    fn kill(&self, pid: u32, mode: KillMode) -> Result<(), ProcessTreeError> {
        platform::send_signal(pid, mode)
    }

    fn kill_tree(&self, pid: u32, mode: KillMode) -> Result<(), ProcessTreeError> {
        platform::kill_tree_native(pid, mode)
    }
}

/// Outcome of one termination pass. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminationReport {
    /// Every pid the pass addressed, children before parents.
    pub members: Vec<u32>,
    pub attempted: usize,
    pub signalled: usize,
    pub already_exited: usize,
    pub failed: usize,
}

impl TerminationReport {
    fn record(&mut self, pid: u32, result: Result<(), ProcessTreeError>) {
        self.members.push(pid);
        self.attempted += 1;
        match result {
            Ok(()) => self.signalled += 1,
            Err(err) if err.is_already_exited() => {
                debug!("pid={} already exited", pid);
                self.already_exited += 1;
            }
            Err(err) => {
                warn!("Failed to terminate pid={}: {}", pid, err);
                self.failed += 1;
            }
        }
    }
}

pub struct ProcessTerminator {
    strategy: TreeStrategy,
    signaller: Arc<dyn Signaller>,
}

impl ProcessTerminator {
    pub fn new(strategy: TreeStrategy, signaller: Arc<dyn Signaller>) -> Self {
        Self {
            strategy,
            signaller,
        }
    }

    pub fn for_current_platform() -> Self {
        Self::from_query(TreeQuery::Auto)
    }

    pub fn from_query(query: TreeQuery) -> Self {
        Self::new(TreeStrategy::from_query(query), Arc::new(SystemSignaller))
    }

    pub fn strategy(&self) -> &TreeStrategy {
        &self.strategy
    }

    /// Kills `root_pid` and every descendant, children before parents.
    pub fn terminate_tree(&self, root_pid: u32, mode: KillMode) -> TerminationReport {
        let report = match &self.strategy {
            TreeStrategy::NativeTreeKill => {
                let mut report = TerminationReport::default();
                report.record(root_pid, self.signaller.kill_tree(root_pid, mode));
                report
            }
            TreeStrategy::Walk(query) => {
                // Enumerate everything first so no lookup races a kill.
                let tree = enumerate(query.as_ref(), root_pid, platform::current_pid());
                self.terminate_enumerated(&tree, mode)
            }
        };

        info!(
            "Terminated tree rooted at pid={} ({:?}, strategy={}): {} signalled, {} already exited, {} failed",
            root_pid,
            mode,
            self.strategy.describe(),
            report.signalled,
            report.already_exited,
            report.failed
        );
        report
    }

    /// Kills an already enumerated tree leaves-first.
    pub fn terminate_enumerated(&self, tree: &ProcessNode, mode: KillMode) -> TerminationReport {
        self.terminate_pids(&tree.leaves_first(), mode)
    }

    /// Kills each pid on its own, in the given order.
    pub fn terminate_pids(&self, pids: &[u32], mode: KillMode) -> TerminationReport {
        let mut report = TerminationReport::default();
        for &pid in pids {
            report.record(pid, self.signaller.kill(pid, mode));
        }
        report
    }

    /// The subset of `pids` that is still running.
    pub fn survivors(&self, pids: &[u32]) -> Vec<u32> {
        pids.iter()
            .copied()
            .filter(|pid| self.signaller.is_alive(*pid))
            .collect()
    }
}

impl std::fmt::Debug for ProcessTerminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTerminator")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}
