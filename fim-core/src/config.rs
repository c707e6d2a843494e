//! YAML configuration at `~/.fim/fim.yaml`.
//!
//! # Storage layout
//!
//! ```text
//! ~/.fim/
//!   fim.yaml     (mode 0600, optional; defaults apply when absent)
//!   fim.db       (default record store location)
//! ```
//!
//! # API pattern
//!
//! Every function touching the home directory has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::types::HostId;

pub const CONFIG_FILE: &str = "fim.yaml";
pub const DATABASE_FILE: &str = "fim.db";
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// 1. Types
// ---------------------------------------------------------------------------

/// Root of `fim.yaml`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host identifier stamped on records registered without one.
    pub host_ip: HostId,
    /// Reconciliation interval in seconds.
    pub check_interval: u64,
    pub database: DatabaseConfig,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host_ip: HostId::default(),
            check_interval: DEFAULT_CHECK_INTERVAL_SECS,
            database: DatabaseConfig::default(),
            log_format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// The slice of configuration the monitoring engine runs with, handed to
/// each component at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub host: HostId,
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            host: HostId::default(),
            interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
        }
    }
}

impl Config {
    pub fn monitor(&self) -> MonitorConfig {
        MonitorConfig {
            host: self.host_ip.clone(),
            interval: Duration::from_secs(self.check_interval),
        }
    }

    /// Configured database path, or `<home>/.fim/fim.db`.
    pub fn database_path(&self, home: &Path) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| fim_root(home).join(DATABASE_FILE))
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.check_interval == 0 {
            return Err(ConfigError::Invalid(
                "check_interval must be at least 1 second".to_string(),
            ));
        }
        if self.host_ip.as_str().trim().is_empty() {
            return Err(ConfigError::Invalid("host_ip must not be empty".to_string()));
        }
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// 2. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.fim/`
pub fn fim_root(home: &Path) -> PathBuf {
    home.join(".fim")
}

/// `<home>/.fim/fim.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    fim_root(home).join(CONFIG_FILE)
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load `<home>/.fim/fim.yaml`, falling back to defaults when it is absent.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(Config::default());
    }
    load_from(&path)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

/// Load and validate an explicit config file.
///
/// Returns `ConfigError::Parse` (with path + line context) for malformed YAML.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    config.validate()
}

// ---------------------------------------------------------------------------
// 4. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically write `config` to `<home>/.fim/fim.yaml`.
///
/// Write flow: validate → serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &Config) -> Result<PathBuf, ConfigError> {
    let config = config.clone().validate()?;
    let root = fim_root(home);
    std::fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;

    let path = config_path_at(home);
    let tmp_path = path.with_file_name(format!("{CONFIG_FILE}.tmp"));
    let yaml = serde_yaml::to_string(&config)?;
    std::fs::write(&tmp_path, yaml).map_err(|e| io_err(&tmp_path, e))?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

/// `save_at` convenience wrapper.
pub fn save(config: &Config) -> Result<PathBuf, ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
