//! Build-driven start and reload
//!
//! A build pass announces how many targets it will produce; each finished
//! target counts toward the barrier. The firing completion starts the app on
//! the first pass and reloads (or restarts) it on later passes.

use crate::core::barrier::BuildCompletionBarrier;
use crate::error::LauncherError;
use crate::startup::{Launcher, ReloadOutcome};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

/// One line of the build-event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BuildEvent {
    /// A new pass begins; `targets` overrides the configured count.
    Pass {
        #[serde(default)]
        targets: Option<usize>,
    },
    /// A target finished; `epoch`, when stamped, must match the current pass.
    Finished {
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        epoch: Option<u64>,
    },
}

impl BuildEvent {
    /// None for blank lines.
    pub fn parse_line(line: &str) -> Result<Option<Self>, serde_json::Error> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(line).map(Some)
    }
}

/// What a firing completion did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireAction {
    Started(u32),
    Reloaded(ReloadOutcome),
    Restarted(u32),
    /// A custom start hook handled it.
    Hook,
}

/// Handed to a `StartHook` on every firing.
pub struct StartContext<'a> {
    launcher: &'a Launcher,
    /// True until the first successful start of this coordinator.
    pub first_start: bool,
    pub epoch: u64,
}

impl StartContext<'_> {
    pub async fn startup(&self) -> Result<u32, LauncherError> {
        self.launcher.startup().await
    }

    pub async fn reload(&self) -> Result<ReloadOutcome, LauncherError> {
        self.launcher.reload().await
    }

    pub fn launcher(&self) -> &Launcher {
        self.launcher
    }
}

/// Replaces the built-in start/reload decision entirely.
#[async_trait]
pub trait StartHook: Send + Sync {
    async fn on_start(&self, ctx: StartContext<'_>) -> Result<(), LauncherError>;
}

/// Called instead of a restart on every firing after the first start.
#[async_trait]
pub trait ReloadHook: Send + Sync {
    async fn on_reload(&self, launcher: &Launcher) -> Result<ReloadOutcome, LauncherError>;
}

/// Reload hook that sends the launcher's hot-reload message.
#[derive(Debug, Clone, Copy, Default)]
pub struct HotReload;

#[async_trait]
impl ReloadHook for HotReload {
    async fn on_reload(&self, launcher: &Launcher) -> Result<ReloadOutcome, LauncherError> {
        launcher.reload().await
    }
}

pub struct BuildCoordinator {
    launcher: Arc<Launcher>,
    barrier: BuildCompletionBarrier,
    targets: usize,
    started: AtomicBool,
    start_hook: Option<Arc<dyn StartHook>>,
    reload_hook: Option<Arc<dyn ReloadHook>>,
}

impl BuildCoordinator {
    /// Coordinator whose first pass expects `targets` completions.
    pub fn new(launcher: Arc<Launcher>, targets: usize) -> Self {
        Self {
            launcher,
            barrier: BuildCompletionBarrier::new(targets),
            targets,
            started: AtomicBool::new(false),
            start_hook: None,
            reload_hook: None,
        }
    }

    pub fn with_start_hook(mut self, hook: Arc<dyn StartHook>) -> Self {
        self.start_hook = Some(hook);
        self
    }

    pub fn with_reload_hook(mut self, hook: Arc<dyn ReloadHook>) -> Self {
        self.reload_hook = Some(hook);
        self
    }

    pub fn launcher(&self) -> &Arc<Launcher> {
        &self.launcher
    }

    pub fn barrier(&self) -> &BuildCompletionBarrier {
        &self.barrier
    }

    /// Starts a new pass; completions of earlier passes stop counting.
    pub fn begin_pass(&self, targets: Option<usize>) -> u64 {
        self.barrier.configure(targets.unwrap_or(self.targets))
    }

    /// Counts one finished target; returns the action if this completion fired.
    ///
    /// A completion stamped with an `epoch` other than the current one is ignored.
    pub async fn target_finished(
        &self,
        target: Option<&str>,
        epoch: Option<u64>,
    ) -> Result<Option<FireAction>, LauncherError> {
        debug!("Build target finished: {}", target.unwrap_or("<unnamed>"));
        let fired = match epoch {
            Some(epoch) => self.barrier.signal_epoch(epoch),
            None => self.barrier.signal_one(),
        };
        if !fired {
            return Ok(None);
        }
        self.fire().await.map(Some)
    }

    pub async fn handle(&self, event: BuildEvent) -> Result<Option<FireAction>, LauncherError> {
        match event {
            BuildEvent::Pass { targets } => {
                self.begin_pass(targets);
                Ok(None)
            }
            BuildEvent::Finished { target, epoch } => {
                self.target_finished(target.as_deref(), epoch).await
            }
        }
    }

    /// Consumes JSON-line build events until EOF. Malformed lines, including
    /// ones that are not UTF-8, are skipped.
    pub async fn run<R>(&self, mut reader: R) -> Result<(), LauncherError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line,
                Err(err) => {
                    warn!("Ignoring build event that is not UTF-8: {}", err);
                    continue;
                }
            };
            match BuildEvent::parse_line(line) {
                Ok(Some(event)) => {
                    self.handle(event).await?;
                }
                Ok(None) => {}
                Err(err) => warn!("Ignoring malformed build event {:?}: {}", line, err),
            }
        }
        debug!("Build event stream closed");
        Ok(())
    }

    /// Runs the event stream, then waits for the app to exit on its own.
    ///
    /// The app is stopped before returning on every path, including a failed
    /// stream or launch. Returns the app's exit code, if it had one.
    pub async fn serve<R>(&self, reader: R) -> Result<Option<i32>, LauncherError>
    where
        R: AsyncBufRead + Unpin,
    {
        if let Err(err) = self.run(reader).await {
            warn!("Build event loop failed: {}; stopping the app", err);
            self.launcher.exit().await;
            return Err(err);
        }

        info!("Build events ended; waiting for the app to exit");
        let code = self.launcher.supervisor().wait().await;
        self.launcher.exit().await;
        Ok(code)
    }

    async fn fire(&self) -> Result<FireAction, LauncherError> {
        let first_start = !self.started.load(Ordering::SeqCst);

        if let Some(hook) = &self.start_hook {
            let ctx = StartContext {
                launcher: &self.launcher,
                first_start,
                epoch: self.barrier.epoch(),
            };
            hook.on_start(ctx).await?;
            self.started.store(true, Ordering::SeqCst);
            return Ok(FireAction::Hook);
        }

        if first_start {
            let pid = self.launcher.startup().await?;
            self.started.store(true, Ordering::SeqCst);
            return Ok(FireAction::Started(pid));
        }

        match &self.reload_hook {
            Some(hook) => {
                let outcome = hook.on_reload(&self.launcher).await?;
                info!("Reloaded after rebuild: {:?}", outcome);
                Ok(FireAction::Reloaded(outcome))
            }
            None => {
                let pid = self.launcher.startup().await?;
                info!("Restarted after rebuild (pid={})", pid);
                Ok(FireAction::Restarted(pid))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::FixedLocator;
    use crate::supervisor::Supervisor;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_build_events() {
        assert_eq!(
            BuildEvent::parse_line(r#"{"event":"pass","targets":2}"#).unwrap(),
            Some(BuildEvent::Pass { targets: Some(2) })
        );
        assert_eq!(
            BuildEvent::parse_line(r#"{"event":"pass"}"#).unwrap(),
            Some(BuildEvent::Pass { targets: None })
        );
        assert_eq!(
            BuildEvent::parse_line(r#" {"event":"finished","target":"main"} "#).unwrap(),
            Some(BuildEvent::Finished {
                target: Some("main".to_string()),
                epoch: None,
            })
        );
        assert_eq!(
            BuildEvent::parse_line(r#"{"event":"finished","epoch":3}"#).unwrap(),
            Some(BuildEvent::Finished {
                target: None,
                epoch: Some(3),
            })
        );
        assert_eq!(BuildEvent::parse_line("   ").unwrap(), None);
        assert!(BuildEvent::parse_line(r#"{"event":"bogus"}"#).is_err());
    }

    #[derive(Default)]
    struct CountingHook {
        seen: Mutex<Vec<(bool, u64)>>,
    }

    #[async_trait]
    impl StartHook for CountingHook {
        async fn on_start(&self, ctx: StartContext<'_>) -> Result<(), LauncherError> {
            self.seen.lock().push((ctx.first_start, ctx.epoch));
            Ok(())
        }
    }

    fn launcher() -> Arc<Launcher> {
        Arc::new(
            Launcher::new(
                Supervisor::new(),
                Arc::new(FixedLocator::new("/nonexistent/appwarden-app")),
            )
            .with_exit_hook(false),
        )
    }

    #[tokio::test]
    async fn test_start_hook_runs_once_per_epoch() {
        let hook = Arc::new(CountingHook::default());
        let coordinator = BuildCoordinator::new(launcher(), 2).with_start_hook(hook.clone());

        assert_eq!(coordinator.target_finished(Some("main"), None).await.unwrap(), None);
        assert_eq!(
            coordinator.target_finished(Some("preload"), None).await.unwrap(),
            Some(FireAction::Hook)
        );
        assert_eq!(coordinator.target_finished(Some("main"), None).await.unwrap(), None);

        let epoch = coordinator.begin_pass(Some(1));
        assert_eq!(
            coordinator.target_finished(None, None).await.unwrap(),
            Some(FireAction::Hook)
        );

        assert_eq!(*hook.seen.lock(), vec![(true, 1), (false, epoch)]);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported_and_not_marked_started() {
        let coordinator = BuildCoordinator::new(launcher(), 1);

        let err = coordinator.target_finished(None, None).await.unwrap_err();
        assert!(err.is_spawn_failure());
        assert!(!coordinator.started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_skips_malformed_lines() {
        let hook = Arc::new(CountingHook::default());
        let coordinator = BuildCoordinator::new(launcher(), 2).with_start_hook(hook.clone());
        let input = b"{\"event\":\"pass\"}\nnot json\n\n{\"event\":\"finished\"}\n{\"event\":\"finished\"}\n";

        coordinator.run(&input[..]).await.unwrap();

        assert_eq!(hook.seen.lock().len(), 1);
        assert_eq!(coordinator.barrier().snapshot().completed, 2);
    }

    #[tokio::test]
    async fn test_run_skips_lines_that_are_not_utf8() {
        let hook = Arc::new(CountingHook::default());
        let coordinator = BuildCoordinator::new(launcher(), 1).with_start_hook(hook.clone());
        let input = b"\xff\xfe\n{\"event\":\"finished\"}\n";

        coordinator.run(&input[..]).await.unwrap();

        assert_eq!(hook.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_epoch_completion_is_ignored() {
        let hook = Arc::new(CountingHook::default());
        let coordinator = BuildCoordinator::new(launcher(), 1).with_start_hook(hook.clone());
        let stale = coordinator.barrier().epoch();
        let current = coordinator.begin_pass(Some(1));

        assert_eq!(coordinator.target_finished(Some("main"), Some(stale)).await.unwrap(), None);
        assert_eq!(
            coordinator.target_finished(Some("main"), Some(current)).await.unwrap(),
            Some(FireAction::Hook)
        );
        assert_eq!(*hook.seen.lock(), vec![(true, current)]);
    }
}
