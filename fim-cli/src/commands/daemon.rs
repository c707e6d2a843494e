//! `fim daemon`: monitoring daemon lifecycle.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde_json::Value;

use fim_daemon::paths::socket_path;
use fim_daemon::{request_status, request_stop, start_blocking, DaemonError};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run daemon in foreground (watcher + reconciler + socket server).
    Start,
    /// Request graceful daemon shutdown over Unix socket.
    Stop,
    /// Query daemon runtime status over Unix socket.
    Status(DaemonStatusArgs),
}

#[derive(Args, Debug)]
pub struct DaemonStatusArgs {
    /// Emit the raw status JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = super::home()?;

    match command {
        DaemonCommand::Start => {
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status(args) => {
            let status = match request_status(&home) {
                Ok(status) => status,
                Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };
            if args.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&status)
                        .context("failed to render daemon status JSON")?
                );
            } else {
                print_status(&status);
            }
        }
    }

    Ok(())
}

fn print_status(status: &Value) {
    if !status["running"].as_bool().unwrap_or(false) {
        println!("{} daemon is not running", "■".bright_black().bold());
        return;
    }

    let since = status["started_at_unix"]
        .as_i64()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("{} daemon running since {since}", "■".green().bold());
    println!("  host_ip:        {}", display(&status["host_ip"]));
    println!("  check_interval: {}s", display(&status["check_interval_secs"]));
    println!("  database:       {}", display(&status["database"]));
    println!("  socket:         {}", display(&status["socket"]));
    println!(
        "  files:          {} active, {} watched",
        display(&status["active"]),
        display(&status["watched"])
    );

    let sweep = &status["last_sweep"];
    if sweep.is_null() {
        println!("  last sweep:     pending");
    } else {
        println!(
            "  last sweep:     {} checked, {} modified, {} deleted, {} failed ({} ms)",
            display(&sweep["checked"]),
            display(&sweep["modified"]),
            display(&sweep["deleted"]),
            display(&sweep["failed"]),
            display(&sweep["duration_ms"]),
        );
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}
