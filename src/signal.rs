use crate::supervisor::Supervisor;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

// Set once per host lifetime, never reset.
static EXIT_HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

pub fn exit_hook_installed() -> bool {
    EXIT_HOOK_INSTALLED.load(Ordering::SeqCst)
}

/// Installs the host-exit hook: on Ctrl-C, SIGTERM or SIGHUP the managed
/// process tree is shut down and the host exits.
///
/// Only the first call installs anything; later calls return false. Must be
/// called from inside a tokio runtime.
pub fn install_exit_hook(supervisor: Supervisor) -> bool {
    if EXIT_HOOK_INSTALLED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return false;
    }

    tokio::spawn(async move {
        let (name, code) = wait_for_termination().await;
        info!("Received {}; stopping managed process", name);
        supervisor.close().await;
        std::process::exit(code);
    });
    true
}

#[cfg(unix)]
async fn wait_for_termination() -> (&'static str, i32) {
    use tokio::signal::unix::SignalKind;

    tokio::select! {
        _ = ctrl_c() => ("SIGINT", 130),
        _ = unix_signal(SignalKind::terminate()) => ("SIGTERM", 143),
        _ = unix_signal(SignalKind::hangup()) => ("SIGHUP", 129),
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() -> (&'static str, i32) {
    ctrl_c().await;
    ("Ctrl-C", 130)
}

async fn ctrl_c() {
    // A handler we could not register must never look like a delivered signal.
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn unix_signal(kind: tokio::signal::unix::SignalKind) {
    match tokio::signal::unix::signal(kind) {
        Ok(mut stream) => {
            if stream.recv().await.is_none() {
                std::future::pending::<()>().await;
            }
        }
        Err(_) => std::future::pending::<()>().await,
    }
}
