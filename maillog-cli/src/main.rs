//! maillog: buffer log events locally and mail a daily summary.
//!
//! # Usage
//!
//! ```text
//! maillog daemon start [--schedule HH:MM] [--buffer <path>] [--to <addr>] [--from <addr>]
//!                      [--smtp-server <host> [--smtp-port <port>]
//!                       [--smtp-username <user> --password-file <path>]]
//! maillog daemon config
//! maillog event <message> [--level info|warning|error]
//! maillog status [--json]
//! ```
//!
//! `--config <path>` and `--socket <path>` apply to every subcommand.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use commands::{daemon::DaemonCommand, event::EventArgs, status::StatusArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "maillog",
    version,
    about = "Collect log events from local processes and mail a daily summary",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file to load instead of ~/.maillog/config.yaml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Daemon socket path.
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run or inspect the collecting daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Submit one event to the running daemon.
    Event(EventArgs),

    /// Show events waiting for the next summary.
    Status(StatusArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(&cli.global, command),
        Commands::Event(args) => args.run(&cli.global),
        Commands::Status(args) => args.run(&cli.global),
    }
}
