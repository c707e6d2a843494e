//! Monitoring daemon: change watcher + periodic reconciler + socket server.

mod error;
pub mod monitor;
pub mod paths;
pub mod protocol;
pub mod reconciler;
mod runtime;
mod scan;
pub mod watcher;

pub use error::{DaemonError, MonitorError};
pub use monitor::Monitor;
pub use protocol::{
    request_deregister, request_list, request_purge, request_register, request_status,
    request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use reconciler::{Reconciler, SweepReport};
pub use runtime::{run, start_blocking};
pub use watcher::{ChangeWatcher, WatcherHandle};
