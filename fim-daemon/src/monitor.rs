//! Registration façade: the operations the request layer calls.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fim_core::{FileRecord, HostId, MonitorConfig, RecordId};
use fim_store::RecordStore;

use crate::error::MonitorError;
use crate::scan::{blocking, observe};
use crate::watcher::WatcherHandle;

#[derive(Debug, Clone)]
pub struct Monitor {
    store: RecordStore,
    watcher: WatcherHandle,
    config: Arc<MonitorConfig>,
}

impl Monitor {
    pub fn new(store: RecordStore, watcher: WatcherHandle, config: MonitorConfig) -> Self {
        Self {
            store,
            watcher,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Start tracking `path`.
    ///
    /// The path must exist and be a regular file. A path that already has a
    /// record keeps its original fingerprint, including a soft-deleted one,
    /// which is revived. A failed watch subscription is logged; the path is
    /// still covered by the periodic sweep.
    pub async fn register(
        &self,
        path: impl AsRef<Path>,
        host: Option<&str>,
    ) -> Result<FileRecord, MonitorError> {
        let requested = path.as_ref().to_path_buf();
        let host = HostId::or_default(host, &self.config.host);
        let store = self.store.clone();

        let record = blocking(move || {
            let path = resolve_existing(&requested)?;
            let observation = observe(&path, &host)?;
            Ok(store.upsert(&observation)?)
        })
        .await?;

        match self.watcher.subscribe(record.file_path.clone()).await {
            Ok(_) => {}
            Err(err @ MonitorError::Watch { .. }) => tracing::warn!(
                error = %err,
                "registered without change notifications; periodic sweep still covers it",
            ),
            Err(err) => return Err(err),
        }

        tracing::info!(
            id = %record.id,
            path = %record.file_path.display(),
            host = %record.host_ip,
            "file registered",
        );
        Ok(record)
    }

    /// Stop tracking `path`. Unknown paths are a no-op; returns whether a
    /// record was flagged.
    ///
    /// Unsubscribes before flagging: once the watcher has answered, no change
    /// event for the path can revive the record.
    pub async fn deregister(&self, path: impl AsRef<Path>) -> Result<bool, MonitorError> {
        let path = resolve_lenient(path.as_ref());
        self.watcher.unsubscribe(path.clone()).await?;
        let store = self.store.clone();
        let flagged = blocking({
            let path = path.clone();
            move || Ok(store.soft_delete(&path)?)
        })
        .await?;

        if flagged {
            tracing::info!(path = %path.display(), "file deregistered");
        }
        Ok(flagged)
    }

    /// Active records.
    pub async fn list(&self) -> Result<Vec<FileRecord>, MonitorError> {
        let store = self.store.clone();
        blocking(move || Ok(store.list_active()?)).await
    }

    /// Every record, soft-deleted ones included.
    pub async fn list_all(&self) -> Result<Vec<FileRecord>, MonitorError> {
        let store = self.store.clone();
        blocking(move || Ok(store.list_all()?)).await
    }

    /// Remove one record physically. Administrative; not part of the
    /// monitoring lifecycle.
    pub async fn purge(&self, id: RecordId) -> Result<Option<FileRecord>, MonitorError> {
        let store = self.store.clone();
        let removed = blocking(move || Ok(store.purge(id)?)).await?;
        if let Some(record) = &removed {
            self.watcher.unsubscribe(record.file_path.clone()).await?;
            tracing::info!(id = %id, path = %record.file_path.display(), "record purged");
        }
        Ok(removed)
    }

    pub async fn watched_paths(&self) -> Result<Vec<PathBuf>, MonitorError> {
        self.watcher.subscriptions().await
    }
}

/// Canonical path of an existing regular file.
fn resolve_existing(path: &Path) -> Result<PathBuf, MonitorError> {
    let canonical = std::fs::canonicalize(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            MonitorError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            MonitorError::Stat {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    let meta = std::fs::metadata(&canonical).map_err(|source| MonitorError::Stat {
        path: canonical.clone(),
        source,
    })?;
    if !meta.is_file() {
        return Err(MonitorError::NotAFile { path: canonical });
    }
    Ok(canonical)
}

/// Canonical path of a file that may already be gone: the whole path when it
/// resolves, else the canonical parent joined with the file name, else the
/// path as given.
fn resolve_lenient(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            std::fs::canonicalize(parent)
                .map(|dir| dir.join(name))
                .unwrap_or_else(|_| path.to_path_buf())
        }
        _ => path.to_path_buf(),
    }
}
