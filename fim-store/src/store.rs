//! Record store: SQLite table of tracked paths and their fingerprints.
//!
//! One row per unique `file_path`. Timestamps are stored as nanoseconds since
//! the Unix epoch so modification times survive a round trip exactly.
//!
//! Every mutation is a single statement (plus read-back) inside an IMMEDIATE
//! transaction, so two writers racing on the same path never leave a row with
//! fields from both.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use fim_core::{FileRecord, Fingerprint, HostId, Observation, RecordId};

use crate::error::{io_err, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    host_ip TEXT NOT NULL,
    file_name TEXT NOT NULL,
    file_path TEXT NOT NULL UNIQUE,
    last_update INTEGER NOT NULL,
    original_hash TEXT NOT NULL,
    latest_hash TEXT NOT NULL,
    scan_time INTEGER NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS files_is_deleted ON files (is_deleted);
";

const COLUMNS: &str = "id, host_ip, file_name, file_path, last_update, original_hash, \
                       latest_hash, scan_time, is_deleted";

// The latest write always lands; `scan_time` never moves backwards even when
// the wall clock does. `original_hash`, `host_ip`, `file_name` and `id` are
// never part of the update set.
const UPSERT: &str = "
INSERT INTO files (host_ip, file_name, file_path, last_update, original_hash, latest_hash, scan_time, is_deleted)
VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, ?7)
ON CONFLICT(file_path) DO UPDATE SET
    last_update = excluded.last_update,
    latest_hash = excluded.latest_hash,
    scan_time = MAX(excluded.scan_time, files.scan_time),
    is_deleted = excluded.is_deleted
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle to the `files` table. Cloning is cheap; all clones use the
/// same connection.
#[derive(Clone)]
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore").finish_non_exhaustive()
    }
}

impl RecordStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        Self::init(conn)
    }

    /// Private in-memory database; used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!("record store schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert the first record for a path, or refresh the mutable fields of
    /// the existing one. Returns the row as stored afterwards.
    ///
    /// The stored `scan_time` is the later of the stored and observed ones.
    pub fn upsert(&self, observation: &Observation) -> Result<FileRecord, StoreError> {
        let path = path_key(&observation.file_path)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            UPSERT,
            params![
                observation.host_ip.as_str(),
                observation.file_name,
                path,
                to_nanos(observation.last_update),
                observation.fingerprint.as_str(),
                to_nanos(observation.scan_time),
                observation.is_deleted,
            ],
        )?;
        let stored = tx.query_row(
            &format!("SELECT {COLUMNS} FROM files WHERE file_path = ?1"),
            params![path],
            record_from_row,
        )?;
        tx.commit()?;

        if stored.scan_time > observation.scan_time {
            tracing::debug!(
                path = %observation.file_path.display(),
                "observation predates stored scan time; kept the later scan time",
            );
        }
        Ok(stored)
    }

    pub fn get(&self, path: &Path) -> Result<Option<FileRecord>, StoreError> {
        let key = path_key(path)?;
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM files WHERE file_path = ?1"),
                params![key],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// All records with `is_deleted = false`, ordered by id.
    pub fn list_active(&self) -> Result<Vec<FileRecord>, StoreError> {
        self.query_records(&format!(
            "SELECT {COLUMNS} FROM files WHERE is_deleted = 0 ORDER BY id"
        ))
    }

    /// Every record including soft-deleted ones, ordered by id.
    pub fn list_all(&self) -> Result<Vec<FileRecord>, StoreError> {
        self.query_records(&format!("SELECT {COLUMNS} FROM files ORDER BY id"))
    }

    /// Paths of active records only.
    pub fn list_all_paths_active(&self) -> Result<Vec<PathBuf>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT file_path FROM files WHERE is_deleted = 0 ORDER BY id")?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|path| path.map(PathBuf::from))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(paths)
    }

    /// Flag the record for `path` as deleted. Returns whether a row changed;
    /// an unknown path is not an error.
    pub fn soft_delete(&self, path: &Path) -> Result<bool, StoreError> {
        let key = path_key(path)?;
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE files SET is_deleted = 1 WHERE file_path = ?1 AND is_deleted = 0",
            params![key],
        )?;
        Ok(changed > 0)
    }

    /// Physically remove one row. Administrative only; the monitor itself
    /// never calls this. Returns the removed record, if there was one.
    pub fn purge(&self, id: RecordId) -> Result<Option<FileRecord>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing = tx
            .query_row(
                &format!("SELECT {COLUMNS} FROM files WHERE id = ?1"),
                params![id.0],
                record_from_row,
            )
            .optional()?;
        if existing.is_some() {
            tx.execute("DELETE FROM files WHERE id = ?1", params![id.0])?;
        }
        tx.commit()?;
        Ok(existing)
    }

    fn query_records(&self, sql: &str) -> Result<Vec<FileRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map([], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: RecordId(row.get(0)?),
        host_ip: HostId(row.get(1)?),
        file_name: row.get(2)?,
        file_path: PathBuf::from(row.get::<_, String>(3)?),
        last_update: from_nanos(row.get(4)?),
        original_hash: Fingerprint(row.get(5)?),
        latest_hash: Fingerprint(row.get(6)?),
        scan_time: from_nanos(row.get(7)?),
        is_deleted: row.get(8)?,
    })
}

fn path_key(path: &Path) -> Result<&str, StoreError> {
    path.to_str().ok_or_else(|| StoreError::NonUtf8Path {
        path: path.to_path_buf(),
    })
}

fn to_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}
