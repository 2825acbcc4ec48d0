//! Supervisor for the single managed application process
//!
//! State machine: `Stopped -> Starting -> Running -> Stopping -> Stopped`.
//!
//! - `spawn` always shuts the previous instance down first, under a
//!   lifecycle lock, so two instances never coexist.
//! - `shutdown` is idempotent. The first caller creates one shared
//!   shutdown future; every concurrent caller awaits that same future.
//! - A reaper task owns the OS child handle. When the child exits on its
//!   own while the exit listener is still armed, the host is told to
//!   exit with the same code.

use crate::core::models::{ManagedProcessInfo, ProcessState};
use crate::core::terminator::{KillMode, ProcessTerminator, TerminationReport};
use crate::error::LauncherError;
use crate::locator::ExecutableLocator;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const STRAGGLER_POLL: Duration = Duration::from_millis(50);

/// Called with the exit code when the managed process exits on its own.
pub type ExitHandler = Arc<dyn Fn(i32) + Send + Sync>;

/// Transport used by `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageChannel {
    /// stdin is inherited; `send` is a no-op.
    #[default]
    None,
    /// stdin is piped; each message is written as one line.
    Stdin,
}

#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub cwd: Option<PathBuf>,
    pub env: Vec<(OsString, OsString)>,
    pub message_channel: MessageChannel,
}

impl SpawnOptions {
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_message_channel(mut self, channel: MessageChannel) -> Self {
        self.message_channel = channel;
        self
    }
}

pub struct SupervisorOptions {
    pub terminator: ProcessTerminator,
    /// How long to wait after the graceful pass before forcing.
    pub shutdown_grace: Duration,
    pub on_unexpected_exit: ExitHandler,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            terminator: ProcessTerminator::for_current_platform(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            on_unexpected_exit: Arc::new(exit_host),
        }
    }
}

fn exit_host(code: i32) {
    info!("Managed process exited with code {}; exiting", code);
    std::process::exit(code);
}

/// Cheap to clone; all clones drive the same slot.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    slot: Mutex<Slot>,
    lifecycle: tokio::sync::Mutex<()>,
    // Set by `close`; refuses every later spawn.
    closing: AtomicBool,
    terminator: Arc<ProcessTerminator>,
    shutdown_grace: Duration,
    on_unexpected_exit: ExitHandler,
}

type PendingShutdown = Shared<BoxFuture<'static, ()>>;

#[derive(Default)]
struct Slot {
    state: ProcessState,
    generation: u64,
    process: Option<ManagedProcess>,
    shutdown: Option<PendingShutdown>,
}

struct ManagedProcess {
    pid: u32,
    generation: u64,
    program: PathBuf,
    started_at: DateTime<Utc>,
    exited: watch::Receiver<Option<i32>>,
    exit_listener: Arc<AtomicBool>,
    messages: Option<mpsc::UnboundedSender<String>>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self::with_options(SupervisorOptions::default())
    }

    pub fn with_options(options: SupervisorOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot::default()),
                lifecycle: tokio::sync::Mutex::new(()),
                closing: AtomicBool::new(false),
                terminator: Arc::new(options.terminator),
                shutdown_grace: options.shutdown_grace,
                on_unexpected_exit: options.on_unexpected_exit,
            }),
        }
    }

    pub fn state(&self) -> ProcessState {
        self.inner.slot.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    /// Snapshot of the managed process, if one exists.
    pub fn current(&self) -> Option<ManagedProcessInfo> {
        let slot = self.inner.slot.lock();
        slot.process.as_ref().map(|process| ManagedProcessInfo {
            pid: process.pid,
            state: slot.state,
            program: process.program.clone(),
            started_at: process.started_at,
            generation: process.generation,
        })
    }

    /// Launches a new instance, stopping any previous one first.
    ///
    /// Returns once the OS has started the process; its own startup is not awaited.
    pub async fn spawn<I, S>(
        &self,
        argv: I,
        options: &SpawnOptions,
        locator: &dyn ExecutableLocator,
    ) -> Result<u32, LauncherError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.inner.closing.load(Ordering::SeqCst) {
            return Err(LauncherError::ShuttingDown);
        }
        self.shutdown().await;

        let program = locator.locate()?;
        self.inner.slot.lock().state = ProcessState::Starting;

        match self.start(program, argv, options) {
            Ok(pid) => Ok(pid),
            Err(err) => {
                self.inner.slot.lock().state = ProcessState::Stopped;
                Err(err)
            }
        }
    }

    fn start<I, S>(
        &self,
        program: PathBuf,
        argv: I,
        options: &SpawnOptions,
    ) -> Result<u32, LauncherError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&program);
        command.args(argv);
        command.stdout(Stdio::inherit());
        command.stderr(Stdio::inherit());
        command.stdin(match options.message_channel {
            MessageChannel::None => Stdio::inherit(),
            MessageChannel::Stdin => Stdio::piped(),
        });
        if let Some(cwd) = &options.cwd {
            command.current_dir(cwd);
        }
        command.envs(options.env.iter().map(|(key, value)| (key, value)));

        let mut child = command.spawn().map_err(|source| LauncherError::Spawn {
            program: program.clone(),
            source,
        })?;
        let Some(pid) = child.id() else {
            return Err(LauncherError::MissingPid { program });
        };

        let messages = child
            .stdin
            .take()
            .map(|stdin| spawn_message_writer(pid, stdin));
        let (exit_tx, exited) = watch::channel(None);
        let exit_listener = Arc::new(AtomicBool::new(true));

        let generation = {
            let mut slot = self.inner.slot.lock();
            slot.generation += 1;
            let generation = slot.generation;
            slot.process = Some(ManagedProcess {
                pid,
                generation,
                program: program.clone(),
                started_at: Utc::now(),
                exited,
                exit_listener: exit_listener.clone(),
                messages,
            });
            slot.state = ProcessState::Running;
            generation
        };

        info!(
            "Started {} pid={} (generation {})",
            program.display(),
            pid,
            generation
        );

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => exit_code(status),
                Err(err) => {
                    warn!("Failed to wait for managed process pid={}: {}", pid, err);
                    1
                }
            };
            let _ = exit_tx.send(Some(code));
            inner.release(generation);

            if exit_listener.swap(false, Ordering::SeqCst) {
                (inner.on_unexpected_exit)(code);
            } else {
                debug!("pid={} exited with {} during shutdown", pid, code);
            }
        });

        Ok(pid)
    }

    /// Stops the managed process and its whole tree. Never fails.
    ///
    /// Concurrent callers share one in-flight shutdown. Returns immediately
    /// when nothing is running.
    pub async fn shutdown(&self) {
        let pending = {
            let mut slot = self.inner.slot.lock();
            if let Some(pending) = slot.shutdown.clone() {
                pending
            } else {
                let Some(process) = slot.process.as_mut() else {
                    return;
                };
                // Disarm first so the kill below is not mistaken for an app exit.
                process.exit_listener.store(false, Ordering::SeqCst);
                process.messages = None;
                let pid = process.pid;
                let generation = process.generation;
                let exited = process.exited.clone();

                slot.state = ProcessState::Stopping;
                info!("Stopping managed process pid={}", pid);

                let inner = self.inner.clone();
                let task = tokio::spawn(Inner::run_shutdown(inner.clone(), pid, generation, exited));
                let pending = async move {
                    if let Err(err) = task.await {
                        warn!("Shutdown task for pid={} failed: {}", pid, err);
                        inner.finish_shutdown(generation);
                    }
                }
                .boxed()
                .shared();

                slot.shutdown = Some(pending.clone());
                pending
            }
        };

        pending.await;
    }

    /// Final shutdown for host exit: waits out any spawn in progress, stops
    /// the process and refuses every later spawn.
    pub async fn close(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.closing.store(true, Ordering::SeqCst);
        self.shutdown().await;
    }

    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Best-effort message to the running instance. False when nothing was queued.
    pub fn send(&self, message: impl Into<String>) -> bool {
        let slot = self.inner.slot.lock();
        if slot.state != ProcessState::Running {
            return false;
        }
        match slot.process.as_ref().and_then(|process| process.messages.as_ref()) {
            Some(tx) => tx.send(message.into()).is_ok(),
            None => false,
        }
    }

    /// Waits for the current instance to exit and returns its code.
    pub async fn wait(&self) -> Option<i32> {
        let mut exited = self.inner.slot.lock().process.as_ref()?.exited.clone();
        wait_for_exit(&mut exited).await;
        let code = *exited.borrow();
        code
    }
}

impl Inner {
    async fn run_shutdown(
        self: Arc<Self>,
        pid: u32,
        generation: u64,
        mut exited: watch::Receiver<Option<i32>>,
    ) {
        let deadline = Instant::now() + self.shutdown_grace;
        let graceful = self.terminate(pid, KillMode::Graceful).await;

        let in_time = tokio::time::timeout_at(deadline, wait_for_exit(&mut exited))
            .await
            .is_ok();
        if !in_time {
            warn!(
                "pid={} still running {:?} after termination; forcing",
                pid, self.shutdown_grace
            );
            self.terminate(pid, KillMode::Force).await;
        }

        // Descendants orphaned by the root's exit can no longer be reached
        // through the tree, so they are tracked from the graceful pass.
        let descendants: Vec<u32> = graceful
            .members
            .into_iter()
            .filter(|member| *member != pid)
            .collect();
        let stragglers = self.outlive(descendants, deadline).await;
        if !stragglers.is_empty() {
            warn!(
                "{} descendant(s) of pid={} ignored termination; forcing {:?}",
                stragglers.len(),
                pid,
                stragglers
            );
            let terminator = self.terminator.clone();
            if let Err(err) = tokio::task::spawn_blocking(move || {
                terminator.terminate_pids(&stragglers, KillMode::Force)
            })
            .await
            {
                warn!("Forcing descendants of pid={} panicked: {}", pid, err);
            }
        }

        if !in_time {
            wait_for_exit(&mut exited).await;
        }

        self.finish_shutdown(generation);
        info!("Managed process pid={} stopped", pid);
    }

    /// Polls until every pid has exited or `deadline` passes; returns the rest.
    async fn outlive(&self, mut pids: Vec<u32>, deadline: Instant) -> Vec<u32> {
        loop {
            pids = self.terminator.survivors(&pids);
            if pids.is_empty() || Instant::now() >= deadline {
                return pids;
            }
            tokio::time::sleep(STRAGGLER_POLL).await;
        }
    }

    async fn terminate(&self, pid: u32, mode: KillMode) -> TerminationReport {
        // Enumeration forks ps/pgrep; keep it off the async workers.
        let terminator = self.terminator.clone();
        match tokio::task::spawn_blocking(move || terminator.terminate_tree(pid, mode)).await {
            Ok(report) => report,
            Err(err) => {
                warn!("Tree termination for pid={} panicked: {}", pid, err);
                TerminationReport::default()
            }
        }
    }

    fn finish_shutdown(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if slot
            .process
            .as_ref()
            .is_some_and(|process| process.generation == generation)
        {
            slot.process = None;
        }
        if slot.process.is_none() {
            slot.state = ProcessState::Stopped;
        }
        slot.shutdown = None;
    }

    /// Reaper side: the child is gone.
    fn release(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if slot
            .process
            .as_ref()
            .is_some_and(|process| process.generation == generation)
        {
            slot.process = None;
            if slot.shutdown.is_none() {
                slot.state = ProcessState::Stopped;
            }
        }
    }
}

async fn wait_for_exit(exited: &mut watch::Receiver<Option<i32>>) {
    loop {
        let done = exited.borrow_and_update().is_some();
        if done {
            return;
        }
        // Sender dropped means the reaper is gone, which only happens after exit.
        if exited.changed().await.is_err() {
            return;
        }
    }
}

fn spawn_message_writer(pid: u32, mut stdin: ChildStdin) -> mpsc::UnboundedSender<String> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let mut line = message.into_bytes();
            line.push(b'\n');
            if let Err(err) = stdin.write_all(&line).await {
                debug!("Message channel to pid={} closed: {}", pid, err);
                break;
            }
            let _ = stdin.flush().await;
        }
    });
    tx
}

/// Exit code to mirror; signal deaths map to `128 + signal` on Unix.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
