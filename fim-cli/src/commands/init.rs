//! `fim init [--host <ip>] [--interval <secs>]`

use anyhow::{Context, Result};
use clap::Args;

use fim_core::{config, Config, HostId};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Host identifier stamped on files registered without one.
    #[arg(long)]
    pub host: Option<String>,

    /// Seconds between reconciliation sweeps.
    #[arg(long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// Overwrite an existing configuration.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let path = config::config_path_at(&home);
        if path.exists() && !self.force {
            anyhow::bail!(
                "{} already exists; pass --force to overwrite",
                path.display()
            );
        }

        let mut config = Config::default();
        if let Some(host) = self.host {
            config.host_ip = HostId::from(host);
        }
        if let Some(interval) = self.interval {
            config.check_interval = interval;
        }

        let written = config::save_at(&home, &config)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("✓ Wrote {}", written.display());
        println!(
            "  host_ip: {}  check_interval: {}s  database: {}",
            config.host_ip,
            config.check_interval,
            config.database_path(&home).display()
        );
        Ok(())
    }
}
