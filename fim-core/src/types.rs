//! Domain types for the integrity monitor.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! Field names of [`FileRecord`] follow the persisted `files` table so the
//! JSON rendering of a record matches its row.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Store-assigned identifier of a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Identifier of the host a file lives on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(pub String);

impl HostId {
    /// Used when neither the caller nor the config names a host.
    pub const DEFAULT: &'static str = "127.0.0.1";

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `requested` when it is non-blank, otherwise `fallback`.
    pub fn or_default(requested: Option<&str>, fallback: &HostId) -> HostId {
        match requested.map(str::trim) {
            Some(host) if !host.is_empty() => HostId::from(host),
            _ => fallback.clone(),
        }
    }
}

impl Default for HostId {
    fn default() -> Self {
        Self(Self::DEFAULT.to_owned())
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for HostId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for HostId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Hex content checksum of a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One tracked path as persisted by the record store.
///
/// `original_hash` is fixed at first registration; only `last_update`,
/// `latest_hash`, `scan_time` and `is_deleted` change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: RecordId,
    pub host_ip: HostId,
    pub file_name: String,
    pub file_path: PathBuf,
    /// Modification time observed by the most recent scan.
    pub last_update: DateTime<Utc>,
    pub original_hash: Fingerprint,
    pub latest_hash: Fingerprint,
    pub scan_time: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl FileRecord {
    /// True when the content no longer matches the registration baseline.
    pub fn is_modified(&self) -> bool {
        self.original_hash != self.latest_hash
    }
}

/// What one scan saw for a path; the input of a store upsert.
///
/// When the path has no record yet, `fingerprint` becomes both the original
/// and the latest hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub host_ip: HostId,
    pub file_name: String,
    pub file_path: PathBuf,
    pub last_update: DateTime<Utc>,
    pub fingerprint: Fingerprint,
    pub scan_time: DateTime<Utc>,
    pub is_deleted: bool,
}

impl Observation {
    /// Observation of a present file; the display name is the path's basename.
    pub fn new(
        host_ip: HostId,
        file_path: impl Into<PathBuf>,
        last_update: DateTime<Utc>,
        fingerprint: Fingerprint,
        scan_time: DateTime<Utc>,
    ) -> Self {
        let file_path = file_path.into();
        Self {
            host_ip,
            file_name: display_name(&file_path),
            file_path,
            last_update,
            fingerprint,
            scan_time,
            is_deleted: false,
        }
    }
}

/// Basename of `path`, or the whole path when it has none (e.g. `/`).
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
