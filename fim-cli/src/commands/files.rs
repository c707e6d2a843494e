//! `fim add | remove | list | purge` over the daemon socket.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use fim_core::{FileRecord, RecordId};
use fim_daemon::{
    request_deregister, request_list, request_purge, request_register, DaemonError,
};

#[derive(Args, Debug)]
pub struct AddArgs {
    /// File to monitor; relative paths resolve against the current directory.
    pub path: PathBuf,

    /// Host identifier for this file (defaults to the configured host_ip).
    #[arg(long)]
    pub host: Option<String>,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Include records flagged deleted.
    #[arg(long)]
    pub all: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct PurgeArgs {
    pub id: i64,
}

impl AddArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let path = absolute(&self.path)?;
        let record = request_register(&home, &path, self.host)
            .map_err(not_running_hint)
            .with_context(|| format!("failed to register '{}'", self.path.display()))?;

        println!(
            "✓ Monitoring {} (id {}, host {})",
            record.file_path.display(),
            record.id,
            record.host_ip
        );
        println!("  fingerprint: {}", record.original_hash);
        Ok(())
    }
}

impl RemoveArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let path = absolute(&self.path)?;
        let flagged = request_deregister(&home, &path)
            .map_err(not_running_hint)
            .with_context(|| format!("failed to deregister '{}'", self.path.display()))?;

        if flagged {
            println!("✓ Stopped monitoring {}", path.display());
        } else {
            println!("{} is not monitored", path.display());
        }
        Ok(())
    }
}

impl ListArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let records = request_list(&home, self.all)
            .map_err(not_running_hint)
            .context("failed to list monitored files")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&records).context("failed to serialize records")?
            );
            return Ok(());
        }

        print_table(&records);
        Ok(())
    }
}

impl PurgeArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        match request_purge(&home, RecordId(self.id))
            .map_err(not_running_hint)
            .context("failed to purge record")?
        {
            Some(record) => println!(
                "✓ Purged record {} ({})",
                record.id,
                record.file_path.display()
            ),
            None => println!("no record with id {}", self.id),
        }
        Ok(())
    }
}

#[derive(Tabled)]
struct FileTableRow {
    #[tabled(rename = "id")]
    id: i64,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "host")]
    host: String,
    #[tabled(rename = "modified at")]
    last_update: String,
    #[tabled(rename = "fingerprint")]
    fingerprint: String,
    #[tabled(rename = "last scan")]
    scan_time: String,
}

fn print_table(records: &[FileRecord]) {
    if records.is_empty() {
        println!("No files monitored. Run 'fim add <path>' to register one.");
        return;
    }

    let modified = records
        .iter()
        .filter(|r| !r.is_deleted && r.is_modified())
        .count();
    let rows: Vec<FileTableRow> = records
        .iter()
        .map(|record| FileTableRow {
            id: record.id.0,
            state: state_label(record),
            path: record.file_path.display().to_string(),
            host: record.host_ip.to_string(),
            last_update: local_time(record.last_update),
            fingerprint: short_hash(record.latest_hash.as_str()),
            scan_time: local_time(record.scan_time),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!(
        "{} files | {} {}",
        records.len(),
        modified,
        "modified since registration".yellow()
    );
}

fn state_label(record: &FileRecord) -> String {
    if record.is_deleted {
        "DELETED".bright_black().bold().to_string()
    } else if record.is_modified() {
        "MODIFIED".red().bold().to_string()
    } else {
        "INTACT".green().bold().to_string()
    }
}

fn short_hash(hash: &str) -> String {
    hash.chars().take(12).collect()
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Resolve against the current directory; the daemon runs elsewhere.
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("could not determine current directory")?;
    Ok(cwd.join(path))
}

fn not_running_hint(err: DaemonError) -> anyhow::Error {
    match err {
        DaemonError::DaemonNotRunning { .. } => {
            anyhow::Error::new(err).context("start it with 'fim daemon start'")
        }
        other => other.into(),
    }
}
