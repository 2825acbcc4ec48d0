//! CLI argument parsing
//!
//! Defined with clap derive; `main` dispatches on `Commands`.

use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// Launches a desktop app and keeps its whole process tree in check
#[derive(Parser, Debug, Clone)]
#[command(
    name = "appwarden",
    about = "Desktop app process lifecycle controller",
    version,
    disable_help_subcommand = true
)]
pub struct Cli {
    /// Config file (default: ./appwarden.json when present)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `info,appwarden=trace`
    #[arg(long = "log-level", global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Also write logs to this file
    #[arg(long = "log-file", global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start the app now and exit with its exit code
    Launch {
        /// Package name, program name or path of the app binary
        #[arg(long, value_name = "NAME|PATH")]
        exe: Option<String>,

        /// Arguments for the app (default: `. --no-sandbox`)
        #[arg(last = true, value_name = "ARGS")]
        args: Vec<String>,
    },

    /// Start the app once build events on stdin report every target done
    Serve {
        /// Targets per build pass
        #[arg(long, default_value_t = 1)]
        targets: usize,

        /// Hot-reload instead of restarting on later passes
        #[arg(long)]
        reload: bool,

        #[arg(long, value_name = "NAME|PATH")]
        exe: Option<String>,

        #[arg(last = true, value_name = "ARGS")]
        args: Vec<String>,
    },

    /// Terminate a process and all of its descendants
    #[command(name = "kill-tree")]
    KillTree {
        #[arg(value_name = "PID")]
        pid: u32,

        /// Skip SIGTERM and kill outright
        #[arg(long)]
        force: bool,
    },

    /// Print the descendant tree of a process
    Tree {
        #[arg(value_name = "PID")]
        pid: u32,

        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub fn try_parse_args_from<I, T>(iter: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Cli::try_parse_from(iter)
    }
}
