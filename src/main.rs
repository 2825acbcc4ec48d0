use anyhow::{Context, Result};
use appwarden::commands::{Cli, Commands};
use appwarden::config::LauncherConfig;
use appwarden::coordinator::{BuildCoordinator, HotReload};
use appwarden::core::process_tree::{enumerate, TreeStrategy};
use appwarden::core::terminator::{KillMode, ProcessTerminator};
use appwarden::error::LauncherError;
use appwarden::locator::locator_for;
use appwarden::startup::{self, Launcher};
use appwarden::utils::logger::init_logger;
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            match err.downcast_ref::<LauncherError>() {
                Some(launch) => eprintln!("{}", launch.user_message()),
                None => eprintln!("{:#}", err),
            }
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let root = std::env::current_dir().context("Cannot determine the working directory")?;
    let config = LauncherConfig::discover(cli.config.as_deref(), &root)
        .map_err(LauncherError::from)?;

    let log_level = cli.log_level.as_deref().or(config.log_level.as_deref());
    init_logger(log_level, cli.log_file.clone())?;

    match cli.command {
        Commands::Launch { exe, args } => {
            let launcher = build_launcher(&config, &root, exe, args);
            if let Err(err) = launcher.startup().await {
                launcher.exit().await;
                return Err(err.into());
            }
            let code = launcher.supervisor().wait().await.unwrap_or(0);
            launcher.exit().await;
            Ok(exit_code(code))
        }
        Commands::Serve {
            targets,
            reload,
            exe,
            args,
        } => {
            let launcher = Arc::new(build_launcher(&config, &root, exe, args));
            let mut coordinator = BuildCoordinator::new(launcher.clone(), targets);
            if reload {
                coordinator = coordinator.with_reload_hook(Arc::new(HotReload));
            }

            let code = coordinator
                .serve(BufReader::new(tokio::io::stdin()))
                .await?
                .unwrap_or(0);
            Ok(exit_code(code))
        }
        Commands::KillTree { pid, force } => {
            let mode = if force { KillMode::Force } else { KillMode::Graceful };
            let terminator = ProcessTerminator::from_query(config.tree_query);
            let report = tokio::task::spawn_blocking(move || terminator.terminate_tree(pid, mode))
                .await
                .context("Termination task panicked")?;
            println!(
                "pid {}: {} signalled, {} already exited, {} failed",
                pid, report.signalled, report.already_exited, report.failed
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Tree { pid, json } => {
            let strategy = TreeStrategy::from_query(config.tree_query);
            let tree = enumerate(strategy.child_query().as_ref(), pid, 0);
            if json {
                println!("{}", serde_json::to_string_pretty(&tree)?);
            } else {
                print!("{}", tree);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_launcher(
    config: &LauncherConfig,
    root: &Path,
    exe: Option<String>,
    args: Vec<String>,
) -> Launcher {
    startup::init_global(startup::supervisor_options(config));
    let mut launcher = Launcher::from_config(config, root, startup::global().clone());
    if let Some(exe) = exe {
        launcher = launcher.with_locator(Arc::from(locator_for(&exe, root)));
    }
    if !args.is_empty() {
        launcher = launcher.with_args(args);
    }
    launcher
}

fn exit_code(code: i32) -> ExitCode {
    match startup::portable_exit_code(code) {
        Some(code) => ExitCode::from(code),
        // ExitCode cannot carry it; hand the native status straight to the OS.
        None => std::process::exit(code),
    }
}
