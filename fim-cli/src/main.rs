//! fim: file integrity monitor CLI.
//!
//! # Usage
//!
//! ```text
//! fim init [--host <ip>] [--interval <secs>]
//! fim add <path> [--host <ip>]
//! fim remove <path>
//! fim list [--all] [--json]
//! fim purge <id>
//! fim daemon start|stop|status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand,
    files::{AddArgs, ListArgs, PurgeArgs, RemoveArgs},
    init::InitArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "fim",
    version,
    about = "Track content fingerprints of registered files",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.fim/fim.yaml.
    Init(InitArgs),

    /// Register a file for monitoring.
    Add(AddArgs),

    /// Stop monitoring a file (its record is kept, flagged deleted).
    Remove(RemoveArgs),

    /// List monitored files.
    List(ListArgs),

    /// Physically remove one record by id.
    Purge(PurgeArgs),

    /// Run or control the monitoring daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Add(args) => args.run(),
        Commands::Remove(args) => args.run(),
        Commands::List(args) => args.run(),
        Commands::Purge(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
