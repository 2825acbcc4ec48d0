//! Unified error handling for appwarden
//!
//! Only launch failures cross the public boundary of the lifecycle core.
//! Enumeration and termination problems are absorbed where they happen
//! (see `core::process_tree::ProcessTreeError`), because shutdown runs
//! inside exit handlers where a returned error has nowhere to go.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Error returned by `startup`, `spawn` and the build coordinator.
#[derive(Error, Debug)]
pub enum LauncherError {
    /// The OS refused to start the managed executable.
    #[error("Failed to launch {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The executable locator could not resolve a binary.
    #[error("Executable not found: {name} (looked in node_modules and PATH)")]
    ExecutableNotFound { name: String },

    /// The child started but was reaped before its id could be read.
    #[error("Launched {} but the OS reported no process id", program.display())]
    MissingPid { program: PathBuf },

    /// The supervisor was closed for host exit and accepts no more spawns.
    #[error("Supervisor is shutting down; refusing to launch")]
    ShuttingDown,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    FileNotFound { path: String },
    #[error("Failed to read config file {path}: {message}")]
    Io { path: String, message: String },
    #[error("Invalid JSON in config file {path}: {message}")]
    InvalidFormat { path: String, message: String },
    #[error("Invalid value for `{field}`: {message}")]
    InvalidValue { field: &'static str, message: String },
}

/// Coarse classification used for CLI messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Spawn,
    Config,
    Io,
}

impl LauncherError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            LauncherError::Spawn { .. }
            | LauncherError::ExecutableNotFound { .. }
            | LauncherError::MissingPid { .. }
            | LauncherError::ShuttingDown => ErrorCategory::Spawn,
            LauncherError::Config(_) => ErrorCategory::Config,
            LauncherError::Io(_) => ErrorCategory::Io,
        }
    }

    /// True for the failures callers of `startup` are expected to handle.
    pub fn is_spawn_failure(&self) -> bool {
        self.category() == ErrorCategory::Spawn
    }

    /// Message shown to the user, with a hint where one helps.
    pub fn user_message(&self) -> String {
        match self {
            LauncherError::ExecutableNotFound { name } => format!(
                "{self}\n\nInstall `{name}` in the project (npm i -D {name}) or pass --exe with a path."
            ),
            LauncherError::Config(_) => {
                format!("{self}\n\nCheck appwarden.json or pass --config with a valid file.")
            }
            _ => self.to_string(),
        }
    }
}
