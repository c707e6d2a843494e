use std::path::PathBuf;

use thiserror::Error;

/// Failures of the monitoring engine operations.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("path not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("not a regular file: {}", path.display())]
    NotAFile { path: PathBuf },

    #[error("failed to stat {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Read(#[from] fim_store::FingerprintError),

    #[error("store error: {0}")]
    Store(#[from] fim_store::StoreError),

    #[error("failed to watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("blocking task failed: {0}")]
    Join(String),
}

impl MonitorError {
    /// Caller mistakes, as opposed to failures inside the monitor.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            MonitorError::NotFound { .. } | MonitorError::NotAFile { .. }
        )
    }
}

/// Error surface for daemon runtime and protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] fim_core::ConfigError),

    #[error("store error: {0}")]
    Store(#[from] fim_store::StoreError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
