//! Appwarden Library
//!
//! Process lifecycle control for a desktop app under development: tree-wide
//! termination, a single-instance supervisor with idempotent shutdown, and
//! a build-completion barrier that decides between start and reload.

pub mod commands;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod error;
pub mod locator;
pub mod platform;
pub mod signal;
pub mod startup;
pub mod supervisor;
pub mod utils;

// Re-export commonly used types for convenience
pub use core::barrier::BuildCompletionBarrier;
pub use core::models::*;
pub use core::process_tree::{enumerate, ChildQuery, ProcessTreeError, TreeQuery, TreeStrategy};
pub use core::terminator::{KillMode, ProcessTerminator, TerminationReport};
pub use error::{ConfigError, LauncherError};
pub use locator::{ExecutableLocator, FixedLocator, NamedLocator};
pub use startup::Launcher;
pub use supervisor::{MessageChannel, SpawnOptions, Supervisor, SupervisorOptions};
