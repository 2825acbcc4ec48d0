//! Platform-specific process primitives
//!
//! Everything that differs between Unix and Windows lives behind these
//! functions so the tree walk and the supervisor stay platform-agnostic.

use crate::core::process_tree::{ChildQuery, ProcessTreeError};
use crate::core::terminator::KillMode;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as imp;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as imp;

pub fn current_pid() -> u32 {
    std::process::id()
}

/// Whether `pid` still names a live process.
pub fn process_alive(pid: u32) -> bool {
    imp::process_alive(pid)
}

/// Sends a single kill request to one process.
pub fn send_signal(pid: u32, mode: KillMode) -> Result<(), ProcessTreeError> {
    imp::send_signal(pid, mode)
}

/// Asks the OS to kill `pid` and all of its descendants in one request.
pub fn kill_tree_native(pid: u32, mode: KillMode) -> Result<(), ProcessTreeError> {
    imp::kill_tree_native(pid, mode)
}

/// Child lookup backed by an in-process snapshot rather than an external tool.
pub fn system_query() -> Box<dyn ChildQuery> {
    imp::system_query()
}
