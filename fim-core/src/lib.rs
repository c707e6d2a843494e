//! fim core library: domain types, configuration, errors.
//!
//! Public API surface:
//! - [`types`]: newtypes, [`FileRecord`] and [`Observation`]
//! - [`error`]: [`ConfigError`]
//! - [`config`]: load / save of `~/.fim/fim.yaml`

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, DatabaseConfig, LogFormat, MonitorConfig};
pub use error::ConfigError;
pub use types::{FileRecord, Fingerprint, HostId, Observation, RecordId};
