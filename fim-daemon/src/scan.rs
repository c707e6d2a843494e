//! Filesystem checks shared by the watcher, the reconciler and the façade.

use std::path::Path;

use chrono::Utc;

use fim_core::{HostId, Observation};
use fim_store::{fingerprint, modified_at};

use crate::error::MonitorError;

/// Stat and hash `path` into a fresh observation stamped with `host`.
///
/// A missing path is `NotFound`; any other stat failure is `Stat`.
pub(crate) fn observe(path: &Path, host: &HostId) -> Result<Observation, MonitorError> {
    let last_update = modified_at(path)
        .map_err(|source| MonitorError::Stat {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| MonitorError::NotFound {
            path: path.to_path_buf(),
        })?;
    let fingerprint = fingerprint(path)?;
    Ok(Observation::new(
        host.clone(),
        path,
        last_update,
        fingerprint,
        Utc::now(),
    ))
}

/// Run blocking filesystem/store work off the async executor.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, MonitorError>
where
    F: FnOnce() -> Result<T, MonitorError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| MonitorError::Join(err.to_string()))?
}
