use crate::core::process_tree::{ChildQuery, ProcessTreeError};
use crate::core::terminator::KillMode;
use std::process::{Command, Stdio};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::debug;

// taskkill exits with 128 when the target pid does not exist
const TASKKILL_NOT_FOUND: i32 = 128;

pub fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let sys_pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
    system.process(sys_pid).is_some()
}

/// Windows has no SIGTERM for arbitrary processes; both modes force-terminate.
pub fn send_signal(pid: u32, _mode: KillMode) -> Result<(), ProcessTreeError> {
    taskkill(pid, false)
}

pub fn kill_tree_native(pid: u32, _mode: KillMode) -> Result<(), ProcessTreeError> {
    taskkill(pid, true)
}

fn taskkill(pid: u32, tree: bool) -> Result<(), ProcessTreeError> {
    if pid == 0 {
        return Err(ProcessTreeError::ProcessNotFound(pid));
    }

    let pid_arg = pid.to_string();
    let mut args = vec!["/pid", pid_arg.as_str()];
    if tree {
        args.push("/T");
    }
    args.push("/F");

    let status = Command::new("taskkill")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|source| ProcessTreeError::QueryTool {
            tool: "taskkill",
            source,
        })?;

    match status.code() {
        Some(0) => {
            debug!("pid={} terminated via taskkill (tree={})", pid, tree);
            Ok(())
        }
        Some(TASKKILL_NOT_FOUND) => Err(ProcessTreeError::ProcessNotFound(pid)),
        _ => Err(ProcessTreeError::QueryFailed {
            tool: "taskkill",
            pid,
            message: format!("exited with {status}"),
        }),
    }
}

pub fn system_query() -> Box<dyn ChildQuery> {
    Box::new(SysinfoQuery)
}

/// Child lookup over a fresh sysinfo snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysinfoQuery;

impl ChildQuery for SysinfoQuery {
    fn name(&self) -> &'static str {
        "sysinfo"
    }

    fn children_of(&self, pid: u32) -> Result<Vec<u32>, ProcessTreeError> {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        Ok(system
            .processes()
            .values()
            .filter(|process| process.parent().map(|parent| parent.as_u32()) == Some(pid))
            .map(|process| process.pid().as_u32())
            .collect())
    }
}
