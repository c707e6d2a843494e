//! Periodic reconciliation sweep over every active record.
//!
//! Per record:
//! 1. path gone → soft-delete (the only place disappearance is recorded)
//! 2. mtime differs from the stored one → rehash and upsert
//! 3. mtime unchanged → no write, `scan_time` stays put
//!
//! A failure on one record is logged and the sweep moves on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tokio::time::MissedTickBehavior;

use fim_core::FileRecord;
use fim_store::{modified_at, RecordStore};

use crate::error::MonitorError;
use crate::scan::{blocking, observe};

/// Tally of one sweep, kept for `status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub started_at: Option<DateTime<Utc>>,
    pub checked: usize,
    pub unchanged: usize,
    pub modified: usize,
    pub deleted: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Unchanged,
    Modified,
    Deleted,
}

pub struct Reconciler {
    store: RecordStore,
    interval: Duration,
    last_sweep: Arc<RwLock<Option<SweepReport>>>,
}

impl Reconciler {
    pub fn new(store: RecordStore, interval: Duration) -> Self {
        Self {
            store,
            interval,
            last_sweep: Arc::new(RwLock::new(None)),
        }
    }

    /// Shared view of the most recent sweep report.
    pub fn last_sweep(&self) -> Arc<RwLock<Option<SweepReport>>> {
        self.last_sweep.clone()
    }

    /// Sweep immediately, then once per interval until shutdown.
    ///
    /// Shutdown is only observed between ticks, so a sweep in progress
    /// always runs to completion.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), MonitorError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    let store = self.store.clone();
                    match blocking(move || sweep(&store)).await {
                        Ok(report) => {
                            tracing::info!(
                                checked = report.checked,
                                modified = report.modified,
                                deleted = report.deleted,
                                failed = report.failed,
                                duration_ms = report.duration_ms,
                                "reconciliation sweep finished",
                            );
                            *self.last_sweep.write().await = Some(report);
                        }
                        Err(err) => tracing::error!(error = %err, "reconciliation sweep failed"),
                    }
                }
            }
        }
        Ok(())
    }
}

/// One full pass over the active set.
///
/// Only a failure to read the active set aborts the pass.
pub fn sweep(store: &RecordStore) -> Result<SweepReport, MonitorError> {
    let started = Instant::now();
    let mut report = SweepReport {
        started_at: Some(Utc::now()),
        ..SweepReport::default()
    };

    for record in store.list_active()? {
        report.checked += 1;
        match reconcile(store, &record) {
            Ok(Outcome::Unchanged) => report.unchanged += 1,
            Ok(Outcome::Modified) => report.modified += 1,
            Ok(Outcome::Deleted) => report.deleted += 1,
            Err(err) => {
                report.failed += 1;
                tracing::warn!(
                    path = %record.file_path.display(),
                    error = %err,
                    "reconcile failed for record",
                );
            }
        }
    }

    report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    Ok(report)
}

fn reconcile(store: &RecordStore, record: &FileRecord) -> Result<Outcome, MonitorError> {
    let path = &record.file_path;
    let current = modified_at(path).map_err(|source| MonitorError::Stat {
        path: path.clone(),
        source,
    })?;

    let Some(mtime) = current else {
        store.soft_delete(path)?;
        tracing::info!(path = %path.display(), "tracked file disappeared, marked deleted");
        return Ok(Outcome::Deleted);
    };

    if mtime == record.last_update {
        return Ok(Outcome::Unchanged);
    }

    let observation = match observe(path, &record.host_ip) {
        Ok(observation) => observation,
        // Removed between the stat and the hash; the next sweep records it.
        Err(MonitorError::NotFound { .. }) => return Ok(Outcome::Unchanged),
        Err(err) => return Err(err),
    };
    let stored = store.upsert(&observation)?;
    tracing::info!(
        path = %path.display(),
        latest_hash = %stored.latest_hash,
        modified = stored.is_modified(),
        "mtime drift, fingerprint refreshed",
    );
    Ok(Outcome::Modified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::time::SystemTime;

    use filetime::{set_file_mtime, FileTime};
    use fim_core::{HostId, MonitorConfig};
    use tempfile::TempDir;

    use crate::watcher::refresh;

    fn register(store: &RecordStore, path: &Path) -> FileRecord {
        refresh(store, &MonitorConfig::default(), path).expect("register")
    }

    fn bump_mtime(path: &Path, secs: u64) {
        let stamp = SystemTime::now() + Duration::from_secs(secs);
        set_file_mtime(path, FileTime::from_system_time(stamp)).expect("set mtime");
    }

    #[test]
    fn unchanged_file_is_not_written() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open_in_memory().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "hello").unwrap();
        let before = register(&store, &path);

        let report = sweep(&store).unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(store.get(&path).unwrap().unwrap(), before);
    }

    #[test]
    fn modified_file_gets_new_latest_hash() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open_in_memory().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "hello").unwrap();
        let before = register(&store, &path);

        fs::write(&path, "world").unwrap();
        bump_mtime(&path, 5);

        let report = sweep(&store).unwrap();
        assert_eq!(report.modified, 1);

        let after = store.get(&path).unwrap().unwrap();
        assert_eq!(after.original_hash, before.original_hash);
        assert_eq!(after.latest_hash, fim_store::fingerprint(&path).unwrap());
        assert_eq!(after.last_update, modified_at(&path).unwrap().unwrap());
        assert!(after.scan_time >= before.scan_time);
        assert!(after.is_modified());
    }

    #[test]
    fn vanished_file_is_soft_deleted_with_hashes_untouched() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open_in_memory().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "hello").unwrap();
        let before = register(&store, &path);

        fs::remove_file(&path).unwrap();
        let report = sweep(&store).unwrap();
        assert_eq!(report.deleted, 1);

        let after = store.get(&path).unwrap().unwrap();
        assert!(after.is_deleted);
        assert_eq!(after.latest_hash, before.latest_hash);
        assert_eq!(after.original_hash, before.original_hash);
        assert!(store.list_active().unwrap().is_empty());

        let next = sweep(&store).unwrap();
        assert_eq!(next.checked, 0, "deleted records leave the working set");
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_record_does_not_abort_sweep() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = RecordStore::open_in_memory().unwrap();
        let locked = dir.path().join("locked.txt");
        let open = dir.path().join("open.txt");
        fs::write(&locked, "a").unwrap();
        fs::write(&open, "b").unwrap();
        register(&store, &locked);
        register(&store, &open);

        fs::write(&locked, "changed").unwrap();
        fs::write(&open, "changed").unwrap();
        bump_mtime(&locked, 5);
        bump_mtime(&open, 5);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let report = sweep(&store).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();

        assert_eq!(report.checked, 2);
        // Root can read mode 000 files, so both outcomes are legitimate.
        assert_eq!(report.modified + report.failed, 2);
        assert!(report.modified >= 1);
        let open_record = store.get(&open).unwrap().unwrap();
        assert_eq!(open_record.latest_hash, fim_store::fingerprint(&open).unwrap());
    }

    #[test]
    fn drift_keeps_record_host() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open_in_memory().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "hello").unwrap();
        let config = MonitorConfig {
            host: HostId::from("192.168.1.20"),
            ..MonitorConfig::default()
        };
        refresh(&store, &config, &path).unwrap();

        fs::write(&path, "world").unwrap();
        bump_mtime(&path, 5);
        sweep(&store).unwrap();

        let after = store.get(&path).unwrap().unwrap();
        assert_eq!(after.host_ip, HostId::from("192.168.1.20"));
    }

    #[tokio::test]
    async fn run_sweeps_at_startup_and_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open_in_memory().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "hello").unwrap();
        register(&store, &path);
        fs::remove_file(&path).unwrap();

        let reconciler = Reconciler::new(store.clone(), Duration::from_secs(3600));
        let last_sweep = reconciler.last_sweep();
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let task = tokio::spawn(reconciler.run(shutdown_tx.subscribe()));

        let mut report = None;
        for _ in 0..50 {
            if let Some(done) = last_sweep.read().await.clone() {
                report = Some(done);
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let report = report.expect("startup sweep should run");
        assert_eq!(report.deleted, 1);
        assert!(store.get(&path).unwrap().unwrap().is_deleted);

        shutdown_tx.send(()).unwrap();
        task.await.expect("join").expect("reconciler result");
    }
}
