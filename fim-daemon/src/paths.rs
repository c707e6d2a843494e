use std::path::{Path, PathBuf};

pub use fim_core::config::{config_path_at, fim_root};

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    fim_root(home).join(DAEMON_SOCKET)
}
