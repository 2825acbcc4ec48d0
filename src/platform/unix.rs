use crate::core::process_tree::{ChildQuery, ProcessTreeError};
use crate::core::terminator::KillMode;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::debug;

/// Check if process is alive
///
/// Signal 0 performs the permission and existence checks without delivering anything.
pub fn process_alive(pid: u32) -> bool {
    let Some(target) = to_pid(pid) else {
        return false;
    };
    let exists = match kill(target, None) {
        Ok(()) => true,
        // EPERM means the process exists but belongs to someone else
        Err(errno) => errno == Errno::EPERM,
    };
    exists && !is_zombie(pid)
}

/// A zombie has already exited and only waits to be reaped.
#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    psutil::process::Process::new(pid)
        .and_then(|process| process.status())
        .map(|status| matches!(status, psutil::process::Status::Zombie))
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// Graceful maps to SIGTERM, Force to SIGKILL.
pub fn send_signal(pid: u32, mode: KillMode) -> Result<(), ProcessTreeError> {
    // pid 0 (and anything that does not fit in pid_t) would address a process group
    let Some(target) = to_pid(pid) else {
        return Err(ProcessTreeError::ProcessNotFound(pid));
    };

    let signal = match mode {
        KillMode::Graceful => Signal::SIGTERM,
        KillMode::Force => Signal::SIGKILL,
    };

    match kill(target, signal) {
        Ok(()) => {
            debug!("pid={} sent {}", pid, signal.as_str());
            Ok(())
        }
        Err(Errno::ESRCH) => Err(ProcessTreeError::ProcessNotFound(pid)),
        Err(Errno::EPERM) => Err(ProcessTreeError::PermissionDenied(pid)),
        Err(errno) => Err(ProcessTreeError::ProcessInfo(format!(
            "kill({pid}, {}) failed: {errno}",
            signal.as_str()
        ))),
    }
}

pub fn kill_tree_native(_pid: u32, _mode: KillMode) -> Result<(), ProcessTreeError> {
    Err(ProcessTreeError::UnsupportedPlatform)
}

fn to_pid(pid: u32) -> Option<Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
        _ => None,
    }
}

#[cfg(target_os = "linux")]
pub fn system_query() -> Box<dyn ChildQuery> {
    Box::new(ProcfsQuery)
}

#[cfg(not(target_os = "linux"))]
pub fn system_query() -> Box<dyn ChildQuery> {
    Box::new(crate::core::process_tree::PgrepQuery)
}

/// Reads the process table through psutil (/proc) instead of forking a tool.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcfsQuery;

#[cfg(target_os = "linux")]
impl ChildQuery for ProcfsQuery {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn children_of(&self, pid: u32) -> Result<Vec<u32>, ProcessTreeError> {
        let processes = psutil::process::processes()
            .map_err(|err| ProcessTreeError::ProcessInfo(err.to_string()))?;

        // Entries can vanish between listing and reading; skip those.
        Ok(processes
            .into_iter()
            .filter_map(Result::ok)
            .filter(|process| matches!(process.ppid(), Ok(Some(parent)) if parent == pid))
            .map(|process| process.pid())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_to_exited_process_reports_not_found() {
        let mut child = std::process::Command::new("true").spawn().expect("spawn true");
        let pid = child.id();
        child.wait().expect("reap true");

        let err = send_signal(pid, KillMode::Graceful).unwrap_err();
        assert!(err.is_already_exited());
        assert!(!process_alive(pid));
    }

    #[test]
    fn test_native_tree_kill_is_not_available() {
        assert!(matches!(
            kill_tree_native(1, KillMode::Force),
            Err(ProcessTreeError::UnsupportedPlatform)
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unreaped_child_is_not_alive() {
        let mut child = std::process::Command::new("true").spawn().expect("spawn true");
        let pid = child.id();
        // give it time to exit without reaping it
        std::thread::sleep(std::time::Duration::from_millis(200));

        assert!(!process_alive(pid));
        child.wait().expect("reap true");
    }
}
