//! Launcher configuration
//!
//! Read from an optional `appwarden.json` in the project root. A missing
//! file means defaults; a malformed one is an error. A few values can be
//! overridden from the environment.

use crate::core::process_tree::TreeQuery;
use crate::error::ConfigError;
use crate::supervisor::MessageChannel;
use crate::utils::env::{env_override, expand_env_vars};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "appwarden.json";
pub const DEFAULT_EXECUTABLE: &str = "electron";
pub const DEFAULT_ARGS: [&str; 2] = [".", "--no-sandbox"];
pub const HOT_RELOAD_MESSAGE: &str = "electron-vite&type=hot-reload";
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

pub const EXECUTABLE_ENV: &str = "APPWARDEN_EXECUTABLE";
pub const LOG_ENV: &str = "APPWARDEN_LOG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LauncherConfig {
    /// Package name, program name or path of the app binary.
    pub executable: String,
    /// Arguments passed to the app.
    pub args: Vec<String>,
    /// Working directory for the app, relative to the project root.
    pub cwd: Option<PathBuf>,
    pub shutdown_grace_ms: u64,
    pub hot_reload_message: String,
    pub message_channel: MessageChannel,
    pub tree_query: TreeQuery,
    pub log_level: Option<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            executable: DEFAULT_EXECUTABLE.to_string(),
            args: DEFAULT_ARGS.iter().map(|arg| arg.to_string()).collect(),
            cwd: None,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            hot_reload_message: HOT_RELOAD_MESSAGE.to_string(),
            message_channel: MessageChannel::None,
            tree_query: TreeQuery::Auto,
            log_level: None,
        }
    }
}

impl LauncherConfig {
    /// Loads `path`, failing if it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let config: Self =
            serde_json::from_str(&content).map_err(|err| ConfigError::InvalidFormat {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
        config.validated()
    }

    /// Explicit path if given, otherwise `appwarden.json` under `root` when present.
    pub fn discover(explicit: Option<&Path>, root: &Path) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => {
                let candidate = root.join(CONFIG_FILE_NAME);
                if candidate.exists() {
                    Self::load(&candidate)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(executable) = env_override(EXECUTABLE_ENV) {
            self.executable = executable;
        }
        if let Some(level) = env_override(LOG_ENV) {
            self.log_level = Some(level);
        }
    }

    fn validated(mut self) -> Result<Self, ConfigError> {
        self.executable = expand_env_vars(self.executable.trim());
        if self.executable.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "executable",
                message: "must not be empty".to_string(),
            });
        }
        if self.shutdown_grace_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "shutdown_grace_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(self)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
