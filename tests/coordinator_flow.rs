#![cfg(unix)]

//! Build events driving start, restart and hot reload

use appwarden::coordinator::{BuildCoordinator, BuildEvent, FireAction, HotReload};
use appwarden::startup::{Launcher, ReloadOutcome};
use appwarden::platform;
use appwarden::{FixedLocator, MessageChannel, SpawnOptions, Supervisor, SupervisorOptions};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::BufReader;
use tokio::time::{sleep, timeout};

fn quiet_supervisor() -> Supervisor {
    Supervisor::with_options(SupervisorOptions {
        shutdown_grace: Duration::from_secs(2),
        on_unexpected_exit: Arc::new(|_| {}),
        ..SupervisorOptions::default()
    })
}

fn shell_launcher(script: &str) -> Launcher {
    Launcher::new(quiet_supervisor(), Arc::new(FixedLocator::new("/bin/sh")))
        .with_args(["-c", script])
        .with_exit_hook(false)
}

async fn wait_for_content(path: &Path, expected: &str) -> String {
    let mut content = String::new();
    for _ in 0..40 {
        content = std::fs::read_to_string(path).unwrap_or_default();
        if content.contains(expected) {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    content
}

#[tokio::test]
async fn test_two_targets_start_once() {
    let launcher = Arc::new(shell_launcher("sleep 30"));
    let coordinator = BuildCoordinator::new(launcher.clone(), 2);

    assert_eq!(coordinator.target_finished(Some("main"), None).await.unwrap(), None);
    let action = coordinator.target_finished(Some("preload"), None).await.unwrap();
    let pid = match action {
        Some(FireAction::Started(pid)) => pid,
        other => panic!("expected a start, got {:?}", other),
    };
    assert!(launcher.supervisor().is_running());

    // overshoot from an unrelated rebuild
    for _ in 0..3 {
        assert_eq!(coordinator.target_finished(Some("main"), None).await.unwrap(), None);
    }
    assert_eq!(launcher.supervisor().current().unwrap().pid, pid);

    launcher.exit().await;
}

#[tokio::test]
async fn test_later_pass_restarts_without_reload_hook() {
    let launcher = Arc::new(shell_launcher("sleep 30"));
    let coordinator = BuildCoordinator::new(launcher.clone(), 1);

    let first = coordinator
        .handle(BuildEvent::Finished { target: None, epoch: None })
        .await
        .unwrap();
    let Some(FireAction::Started(first_pid)) = first else {
        panic!("expected a start, got {:?}", first);
    };

    coordinator
        .handle(BuildEvent::Pass { targets: Some(2) })
        .await
        .unwrap();
    assert_eq!(coordinator.target_finished(None, None).await.unwrap(), None);
    let second = coordinator.target_finished(None, None).await.unwrap();
    let Some(FireAction::Restarted(second_pid)) = second else {
        panic!("expected a restart, got {:?}", second);
    };

    assert_ne!(first_pid, second_pid);
    assert_eq!(launcher.supervisor().current().unwrap().pid, second_pid);
    launcher.exit().await;
}

#[tokio::test]
async fn test_reload_hook_sends_hot_reload_message() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("messages.log");
    let script = format!(
        "while read line; do printf '%s\\n' \"$line\" >> '{}'; done",
        log.display()
    );

    let launcher = Arc::new(
        shell_launcher(&script)
            .with_spawn_options(SpawnOptions::default().with_message_channel(MessageChannel::Stdin)),
    );
    let coordinator =
        BuildCoordinator::new(launcher.clone(), 1).with_reload_hook(Arc::new(HotReload));
    let events = b"{\"event\":\"finished\",\"target\":\"main\"}\n".to_vec();
    coordinator.run(&events[..]).await.unwrap();
    let pid = launcher.supervisor().current().unwrap().pid;

    coordinator.begin_pass(None);
    let action = coordinator.target_finished(Some("main"), None).await.unwrap();
    assert_eq!(action, Some(FireAction::Reloaded(ReloadOutcome::HotReloaded)));

    let content = wait_for_content(&log, "electron-vite&type=hot-reload").await;
    assert_eq!(content, "electron-vite&type=hot-reload\n");
    assert_eq!(launcher.supervisor().current().unwrap().pid, pid);

    launcher.exit().await;
}

#[tokio::test]
async fn test_serve_stops_the_app_when_the_event_stream_fails() {
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("app.pid");
    let script = format!("echo $$ > '{}'; exec sleep 30", pid_file.display());
    let launcher = Arc::new(shell_launcher(&script));
    let coordinator = BuildCoordinator::new(launcher.clone(), 1);
    let events = tokio_test::io::Builder::new()
        .read(b"{\"event\":\"finished\"}\n")
        .wait(Duration::from_millis(200))
        .read_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin closed"))
        .build();

    let result = timeout(Duration::from_secs(10), coordinator.serve(BufReader::new(events)))
        .await
        .expect("serve hung");

    assert!(result.is_err());
    assert!(coordinator.barrier().has_fired());
    assert!(!launcher.supervisor().is_running());
    assert!(launcher.supervisor().current().is_none());

    let pid: u32 = wait_for_content(&pid_file, "\n").await.trim().parse().unwrap();
    assert!(!platform::process_alive(pid), "app pid {} outlived serve", pid);
}

#[tokio::test]
async fn test_serve_returns_the_app_exit_code() {
    let launcher = Arc::new(shell_launcher("sleep 0.5; exit 3"));
    let coordinator = BuildCoordinator::new(launcher.clone(), 1);
    let events = b"{\"event\":\"finished\"}\n".to_vec();

    let code = timeout(Duration::from_secs(10), coordinator.serve(&events[..]))
        .await
        .expect("serve hung")
        .unwrap();

    assert_eq!(code, Some(3));
    assert!(!launcher.supervisor().is_running());
}
