//! Application-facing entry points
//!
//! `Launcher` bundles what a start needs (argv, spawn options, locator and
//! hot-reload message) around a `Supervisor`. The free functions drive the
//! process-wide supervisor for callers that do not want to carry one around.

use crate::config::{LauncherConfig, DEFAULT_ARGS, DEFAULT_EXECUTABLE, HOT_RELOAD_MESSAGE};
use crate::core::models::ManagedProcessInfo;
use crate::core::terminator::ProcessTerminator;
use crate::error::LauncherError;
use crate::locator::{locator_for, ExecutableLocator, NamedLocator};
use crate::signal;
use crate::supervisor::{SpawnOptions, Supervisor, SupervisorOptions};
use std::ffi::OsString;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

static SUPERVISOR: OnceLock<Supervisor> = OnceLock::new();

/// The process-wide supervisor, created with default options on first use.
pub fn global() -> &'static Supervisor {
    SUPERVISOR.get_or_init(Supervisor::new)
}

/// Creates the process-wide supervisor with `options`.
///
/// False if it already exists; the existing one is kept.
pub fn init_global(options: SupervisorOptions) -> bool {
    let mut created = false;
    SUPERVISOR.get_or_init(|| {
        created = true;
        Supervisor::with_options(options)
    });
    created
}

/// Result of `Launcher::reload`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The hot-reload message was queued for the running instance.
    HotReloaded,
    /// A fresh instance was started (nothing running, or no message transport).
    Started(u32),
}

pub struct Launcher {
    supervisor: Supervisor,
    argv: Vec<OsString>,
    options: SpawnOptions,
    locator: Arc<dyn ExecutableLocator>,
    hot_reload_message: String,
    exit_hook: bool,
}

impl Launcher {
    pub fn new(supervisor: Supervisor, locator: Arc<dyn ExecutableLocator>) -> Self {
        Self {
            supervisor,
            argv: default_argv(),
            options: SpawnOptions::default(),
            locator,
            hot_reload_message: HOT_RELOAD_MESSAGE.to_string(),
            exit_hook: true,
        }
    }

    /// Launcher for `root` as described by `config`.
    pub fn from_config(config: &LauncherConfig, root: &Path, supervisor: Supervisor) -> Self {
        let mut options = SpawnOptions::default().with_message_channel(config.message_channel);
        if let Some(cwd) = &config.cwd {
            options = options.with_cwd(root.join(cwd));
        }

        Self::new(supervisor, Arc::from(locator_for(&config.executable, root)))
            .with_args(config.args.iter().map(OsString::from))
            .with_spawn_options(options)
            .with_hot_reload_message(config.hot_reload_message.clone())
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.argv = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_spawn_options(mut self, options: SpawnOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_locator(mut self, locator: Arc<dyn ExecutableLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_hot_reload_message(mut self, message: impl Into<String>) -> Self {
        self.hot_reload_message = message.into();
        self
    }

    /// Whether `startup` installs the host-exit hook (on by default).
    pub fn with_exit_hook(mut self, enabled: bool) -> Self {
        self.exit_hook = enabled;
        self
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn args(&self) -> &[OsString] {
        &self.argv
    }

    /// Starts (or restarts) the app. Resolves once the process is launched.
    pub async fn startup(&self) -> Result<u32, LauncherError> {
        if self.exit_hook && signal::install_exit_hook(self.supervisor.clone()) {
            debug!("Host exit hook installed");
        }
        let pid = self
            .supervisor
            .spawn(&self.argv, &self.options, self.locator.as_ref())
            .await?;
        info!("Started managed process pid={}", pid);
        Ok(pid)
    }

    /// Hot-reloads the running app, or starts it when that is not possible.
    pub async fn reload(&self) -> Result<ReloadOutcome, LauncherError> {
        if self.supervisor.send(self.hot_reload_message.as_str()) {
            debug!("Queued hot-reload message");
            return Ok(ReloadOutcome::HotReloaded);
        }
        self.startup().await.map(ReloadOutcome::Started)
    }

    pub fn send(&self, message: impl Into<String>) -> bool {
        self.supervisor.send(message)
    }

    /// Stops the app and every descendant.
    pub async fn exit(&self) {
        self.supervisor.shutdown().await;
    }
}

fn default_argv() -> Vec<OsString> {
    DEFAULT_ARGS.iter().map(OsString::from).collect()
}

/// Starts the app on the process-wide supervisor.
///
/// `argv` defaults to `[".", "--no-sandbox"]`; the locator defaults to
/// looking up `electron` from the current directory.
pub async fn startup(
    argv: Option<Vec<OsString>>,
    options: SpawnOptions,
    locator: Option<Arc<dyn ExecutableLocator>>,
) -> Result<u32, LauncherError> {
    let locator = locator.unwrap_or_else(|| Arc::new(NamedLocator::new(DEFAULT_EXECUTABLE)));
    Launcher::new(global().clone(), locator)
        .with_args(argv.unwrap_or_else(default_argv))
        .with_spawn_options(options)
        .startup()
        .await
}

/// Best-effort message to the app on the process-wide supervisor.
pub fn send(message: impl Into<String>) -> bool {
    global().send(message)
}

/// Stops the app on the process-wide supervisor.
pub async fn exit() {
    global().shutdown().await;
}

/// What the process-wide supervisor is running, if anything.
pub fn current() -> Option<ManagedProcessInfo> {
    global().current()
}

/// Whether the host-exit hook has been installed in this process.
pub fn hooked_process_exit() -> bool {
    signal::exit_hook_installed()
}

/// `code` as a portable process exit status, or None when it only fits the
/// platform's native status (negative or above 255, as Windows NTSTATUS codes are).
pub fn portable_exit_code(code: i32) -> Option<u8> {
    u8::try_from(code).ok()
}

/// Supervisor options for a loaded configuration.
pub fn supervisor_options(config: &LauncherConfig) -> SupervisorOptions {
    SupervisorOptions {
        terminator: ProcessTerminator::from_query(config.tree_query),
        shutdown_grace: config.shutdown_grace(),
        ..SupervisorOptions::default()
    }
}
