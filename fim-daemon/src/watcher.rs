//! Change watcher: OS change notifications for every registered path.
//!
//! The notify backend callback splits its output into two channels, one for
//! events and one for backend errors, both drained by [`ChangeWatcher::run`].
//! The subscription set is owned by the watcher task; the façade changes it
//! only through a [`WatcherHandle`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use notify::event::ModifyKind;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc, oneshot};

use fim_core::{FileRecord, MonitorConfig};
use fim_store::{modified_at, RecordStore};

use crate::error::MonitorError;
use crate::scan::{blocking, observe};

enum WatchCommand {
    Subscribe {
        path: PathBuf,
        respond_to: oneshot::Sender<Result<bool, MonitorError>>,
    },
    Unsubscribe {
        path: PathBuf,
        respond_to: oneshot::Sender<bool>,
    },
    Snapshot {
        respond_to: oneshot::Sender<Vec<PathBuf>>,
    },
}

/// Cloneable entry point for changing the subscription set at runtime.
#[derive(Debug, Clone)]
pub struct WatcherHandle {
    commands: mpsc::Sender<WatchCommand>,
}

impl std::fmt::Debug for WatchCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchCommand::Subscribe { path, .. } => f.debug_tuple("Subscribe").field(path).finish(),
            WatchCommand::Unsubscribe { path, .. } => {
                f.debug_tuple("Unsubscribe").field(path).finish()
            }
            WatchCommand::Snapshot { .. } => f.write_str("Snapshot"),
        }
    }
}

impl WatcherHandle {
    /// Start watching `path`. `Ok(false)` when it was already watched.
    pub async fn subscribe(&self, path: PathBuf) -> Result<bool, MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(WatchCommand::Subscribe {
                path,
                respond_to: tx,
            })
            .await
            .map_err(|_| MonitorError::ChannelClosed("watcher commands"))?;
        rx.await
            .map_err(|_| MonitorError::ChannelClosed("watcher response"))?
    }

    /// Stop watching `path`. `Ok(false)` when it was not watched.
    pub async fn unsubscribe(&self, path: PathBuf) -> Result<bool, MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(WatchCommand::Unsubscribe {
                path,
                respond_to: tx,
            })
            .await
            .map_err(|_| MonitorError::ChannelClosed("watcher commands"))?;
        rx.await
            .map_err(|_| MonitorError::ChannelClosed("watcher response"))
    }

    /// Currently watched paths, sorted.
    pub async fn subscriptions(&self) -> Result<Vec<PathBuf>, MonitorError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(WatchCommand::Snapshot { respond_to: tx })
            .await
            .map_err(|_| MonitorError::ChannelClosed("watcher commands"))?;
        rx.await
            .map_err(|_| MonitorError::ChannelClosed("watcher response"))
    }
}

pub struct ChangeWatcher {
    backend: RecommendedWatcher,
    subscriptions: HashSet<PathBuf>,
    store: RecordStore,
    config: MonitorConfig,
    events: mpsc::UnboundedReceiver<Event>,
    errors: mpsc::UnboundedReceiver<notify::Error>,
    commands: mpsc::Receiver<WatchCommand>,
}

impl ChangeWatcher {
    pub fn new(
        store: RecordStore,
        config: MonitorConfig,
    ) -> Result<(Self, WatcherHandle), MonitorError> {
        let (event_tx, events) = mpsc::unbounded_channel::<Event>();
        let (error_tx, errors) = mpsc::unbounded_channel::<notify::Error>();
        let backend = recommended_watcher(move |result: notify::Result<Event>| {
            let _ = match result {
                Ok(event) => event_tx.send(event).map_err(drop),
                Err(err) => error_tx.send(err).map_err(drop),
            };
        })
        .map_err(|source| MonitorError::Watch {
            path: PathBuf::new(),
            source,
        })?;

        let (command_tx, commands) = mpsc::channel(64);
        let watcher = Self {
            backend,
            subscriptions: HashSet::new(),
            store,
            config,
            events,
            errors,
            commands,
        };
        Ok((
            watcher,
            WatcherHandle {
                commands: command_tx,
            },
        ))
    }

    /// Subscribe to every active path in the store.
    ///
    /// Missing paths are skipped and left untouched; the reconciler owns
    /// soft-deletion. Returns the number of paths now watched.
    pub fn reload_from_store(&mut self) -> Result<usize, MonitorError> {
        for path in self.store.list_all_paths_active()? {
            match modified_at(&path) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::warn!(path = %path.display(), "tracked file missing, not watching");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "stat failed, not watching");
                    continue;
                }
            }
            if let Err(err) = self.subscribe(&path) {
                tracing::warn!(error = %err, "watch subscription failed; periodic sweep still covers it");
            }
        }
        tracing::info!(watched = self.subscriptions.len(), "watcher reloaded from store");
        Ok(self.subscriptions.len())
    }

    /// Drain events, backend errors and subscription commands until shutdown.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), MonitorError> {
        let mut commands_open = true;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                command = self.commands.recv(), if commands_open => {
                    match command {
                        Some(command) => self.apply(command),
                        None => commands_open = false,
                    }
                }
                event = self.events.recv() => {
                    let Some(event) = event else { break };
                    self.handle_event(event).await;
                }
                err = self.errors.recv() => {
                    let Some(err) = err else { break };
                    tracing::warn!(error = %err, paths = ?err.paths, "watcher backend error");
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, command: WatchCommand) {
        match command {
            WatchCommand::Subscribe { path, respond_to } => {
                let _ = respond_to.send(self.subscribe(&path));
            }
            WatchCommand::Unsubscribe { path, respond_to } => {
                let _ = respond_to.send(self.unsubscribe(&path));
            }
            WatchCommand::Snapshot { respond_to } => {
                let mut paths: Vec<PathBuf> = self.subscriptions.iter().cloned().collect();
                paths.sort();
                let _ = respond_to.send(paths);
            }
        }
    }

    /// Arm an OS watch on `path`. `Ok(false)` when the path was already in
    /// the set; its watch is re-armed anyway, since the old one may have died
    /// with a replaced inode.
    fn subscribe(&mut self, path: &Path) -> Result<bool, MonitorError> {
        let known = self.subscriptions.contains(path);
        if known {
            let _ = self.backend.unwatch(path);
        }
        if let Err(source) = self.backend.watch(path, RecursiveMode::NonRecursive) {
            self.subscriptions.remove(path);
            return Err(MonitorError::Watch {
                path: path.to_path_buf(),
                source,
            });
        }
        self.subscriptions.insert(path.to_path_buf());
        if known {
            tracing::debug!(path = %path.display(), "watch re-armed");
        } else {
            tracing::info!(path = %path.display(), "watching file");
        }
        Ok(!known)
    }

    fn unsubscribe(&mut self, path: &Path) -> bool {
        if !self.subscriptions.remove(path) {
            return false;
        }
        // The OS drops the watch on its own once the file is gone.
        if let Err(err) = self.backend.unwatch(path) {
            tracing::debug!(path = %path.display(), error = %err, "unwatch failed");
        }
        tracing::info!(path = %path.display(), "stopped watching file");
        true
    }

    async fn handle_event(&mut self, event: Event) {
        let content = is_content_event(&event.kind);
        let detached = is_detach_event(&event.kind);
        if !content && !detached {
            return;
        }
        for path in event.paths {
            if !self.subscriptions.contains(&path) {
                continue;
            }
            if detached && !self.rearm(&path) {
                continue;
            }
            self.refresh_path(path).await;
        }
    }

    /// The watch on `path` went away with its inode (removal, or a rename
    /// over it). Re-arm when a file is back at the path; otherwise forget the
    /// subscription. The record itself is left to the reconciler.
    fn rearm(&mut self, path: &Path) -> bool {
        let _ = self.backend.unwatch(path);
        if matches!(modified_at(path), Ok(Some(_))) {
            match self.backend.watch(path, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "watch re-armed after replace");
                    return true;
                }
                Err(err) => tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "re-arming watch failed; periodic sweep still covers it",
                ),
            }
        }
        self.subscriptions.remove(path);
        tracing::info!(path = %path.display(), "watched file went away, watch dropped");
        false
    }

    async fn refresh_path(&self, path: PathBuf) {
        let store = self.store.clone();
        let config = self.config.clone();
        let outcome = blocking({
            let path = path.clone();
            move || refresh(&store, &config, &path)
        })
        .await;
        match outcome {
            Ok(record) => tracing::info!(
                path = %path.display(),
                latest_hash = %record.latest_hash,
                modified = record.is_modified(),
                "fingerprint refreshed from change event",
            ),
            Err(err) => tracing::warn!(
                path = %path.display(),
                error = %err,
                "change event skipped",
            ),
        }
    }
}

/// Rescan one path after a change event and persist the result.
///
/// A stat failure (including a vanished file) is an error here; marking the
/// record deleted is left to the reconciler.
pub(crate) fn refresh(
    store: &RecordStore,
    config: &MonitorConfig,
    path: &Path,
) -> Result<FileRecord, MonitorError> {
    let observation = observe(path, &config.host)?;
    Ok(store.upsert(&observation)?)
}

fn is_content_event(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any)
    )
}

/// Events after which an inode watch on the path no longer sees the file.
fn is_detach_event(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    )
}
