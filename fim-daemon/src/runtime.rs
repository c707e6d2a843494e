use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, RwLock};

use fim_core::{config, LogFormat, RecordId};
use fim_store::RecordStore;

use crate::error::{io_err, DaemonError, MonitorError};
use crate::monitor::Monitor;
use crate::paths::{fim_root, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::reconciler::{Reconciler, SweepReport};
use crate::watcher::ChangeWatcher;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// State the socket handlers read from.
#[derive(Clone)]
struct Shared {
    home: PathBuf,
    database: PathBuf,
    monitor: Monitor,
    last_sweep: Arc<RwLock<Option<SweepReport>>>,
    started_at_unix: u64,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    let config = config::load_at(home)?;
    init_tracing(config.log_format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let config = config::load_at(&home)?;
    let monitor_config = config.monitor();
    let database = config.database_path(&home);
    let store = {
        let database = database.clone();
        tokio::task::spawn_blocking(move || RecordStore::open(&database))
            .await
            .map_err(|err| DaemonError::Protocol(format!("store open task failed: {err}")))??
    };

    let (mut watcher, watcher_handle) = ChangeWatcher::new(store.clone(), monitor_config.clone())?;
    watcher.reload_from_store()?;

    let reconciler = Reconciler::new(store.clone(), monitor_config.interval);
    let shared = Shared {
        home: home.clone(),
        database,
        monitor: Monitor::new(store, watcher_handle, monitor_config.clone()),
        last_sweep: reconciler.last_sweep(),
        started_at_unix: unix_seconds_now(),
    };

    tracing::info!(
        host = %monitor_config.host,
        interval_secs = monitor_config.interval.as_secs(),
        database = %shared.database.display(),
        "fim daemon starting",
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let watcher_task = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let result = watcher
                .run(shutdown.subscribe())
                .await
                .map_err(DaemonError::from);
            let _ = shutdown.send(());
            result
        })
    };

    let reconciler_task = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let result = reconciler
                .run(shutdown.subscribe())
                .await
                .map_err(DaemonError::from);
            let _ = shutdown.send(());
            result
        })
    };

    let socket_task = {
        let shutdown = shutdown_tx.clone();
        let shared = shared.clone();
        tokio::spawn(async move {
            let result = socket_server_task(shared, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_task = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (watcher_result, reconciler_result, socket_result, signal_result) =
        tokio::join!(watcher_task, reconciler_task, socket_task, signal_task);

    handle_join("watcher", watcher_result)?;
    handle_join("reconciler", reconciler_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("fim daemon stopped");
    Ok(())
}

async fn socket_server_task(
    shared: Shared,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&shared.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening for requests");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(err) => {
                        // EMFILE, ECONNABORTED and friends are per connection.
                        tracing::warn!(socket = %socket.display(), error = %err, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };
                let shared = shared.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, shared, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    shared: Shared,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stop = request.cmd == "stop";
        let response = if stop {
            let _ = shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        } else {
            dispatch(&shared, request).await
        };

        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }

    Ok(())
}

/// Execute one non-lifecycle request against the monitor.
async fn dispatch(shared: &Shared, request: DaemonRequest) -> DaemonResponse {
    let monitor = &shared.monitor;
    let result: Result<Value, MonitorError> = match request.cmd.as_str() {
        "status" => return DaemonResponse::ok(build_status_payload(shared).await),
        "register" => {
            let Some(path) = request.path else {
                return DaemonResponse::error("register requires 'path'");
            };
            monitor
                .register(&path, request.host.as_deref())
                .await
                .map(|record| json!(record))
        }
        "deregister" => {
            let Some(path) = request.path else {
                return DaemonResponse::error("deregister requires 'path'");
            };
            monitor
                .deregister(&path)
                .await
                .map(|flagged| json!({ "deregistered": flagged }))
        }
        "list" => {
            let records = if request.all.unwrap_or(false) {
                monitor.list_all().await
            } else {
                monitor.list().await
            };
            records.map(|records| json!(records))
        }
        "purge" => {
            let Some(id) = request.id else {
                return DaemonResponse::error("purge requires 'id'");
            };
            monitor.purge(RecordId(id)).await.map(|removed| json!(removed))
        }
        other => return DaemonResponse::error(format!("unknown command '{other}'")),
    };

    match result {
        Ok(data) => DaemonResponse::ok(data),
        Err(err) if err.is_bad_request() => DaemonResponse::error(err.to_string()),
        Err(err) => {
            tracing::error!(cmd = %request.cmd, error = %err, "request failed");
            DaemonResponse::error(format!("internal error: {err}"))
        }
    }
}

async fn build_status_payload(shared: &Shared) -> Value {
    let config = shared.monitor.config();
    let watched = match shared.monitor.watched_paths().await {
        Ok(paths) => json!(paths.len()),
        Err(err) => {
            tracing::warn!(error = %err, "watcher unavailable for status");
            Value::Null
        }
    };
    let active = match shared.monitor.list().await {
        Ok(records) => json!(records.len()),
        Err(err) => {
            tracing::warn!(error = %err, "store unavailable for status");
            Value::Null
        }
    };
    let last_sweep = shared.last_sweep.read().await.clone();

    json!({
        "running": true,
        "started_at_unix": shared.started_at_unix,
        "socket": socket_path(&shared.home).display().to_string(),
        "database": shared.database.display().to_string(),
        "host_ip": config.host,
        "check_interval_secs": config.interval.as_secs(),
        "watched": watched,
        "active": active,
        "last_sweep": last_sweep,
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = fim_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    use fim_core::{Config, HostId};
    use tempfile::TempDir;

    use crate::protocol::{
        request_deregister, request_list, request_purge, request_register, request_status,
        request_stop, send_request,
    };

    fn write_config(home: &Path, interval: u64) {
        let config = Config {
            host_ip: HostId::from("10.1.1.1"),
            check_interval: interval,
            ..Config::default()
        };
        config::save_at(home, &config).expect("save config");
    }

    async fn blocking<T: Send + 'static>(work: impl FnOnce() -> T + Send + 'static) -> T {
        tokio::task::spawn_blocking(work).await.expect("join")
    }

    async fn wait_for_socket(home: &Path) {
        for _ in 0..100 {
            if socket_path(home).exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("daemon socket never appeared");
    }

    #[test]
    fn stale_socket_file_is_removed_before_bind() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("daemon.sock");
        fs::write(&socket, b"").unwrap();
        prepare_socket_for_bind(&socket).unwrap();
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn live_socket_is_not_replaced() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("daemon.sock");
        let _listener = UnixListener::bind(&socket).unwrap();
        let err = prepare_socket_for_bind(&socket).unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(msg) if msg.contains("already in use")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn daemon_serves_requests_over_socket_until_stopped() {
        let home = TempDir::new().unwrap();
        write_config(home.path(), 3600);
        let files = TempDir::new().unwrap();
        let path = files.path().join("a.txt");
        fs::write(&path, "hello").unwrap();

        let daemon = tokio::spawn(run(home.path().to_path_buf()));
        wait_for_socket(home.path()).await;

        let h = home.path().to_path_buf();
        let status = blocking(move || request_status(&h)).await.unwrap();
        assert_eq!(status["running"], json!(true));
        assert_eq!(status["host_ip"], json!("10.1.1.1"));
        assert_eq!(status["check_interval_secs"], json!(3600));

        let (h, p) = (home.path().to_path_buf(), path.clone());
        let record = blocking(move || request_register(&h, &p, None))
            .await
            .unwrap();
        assert_eq!(record.host_ip, HostId::from("10.1.1.1"));
        assert_eq!(record.original_hash, record.latest_hash);

        let h = home.path().to_path_buf();
        let missing = files.path().join("missing.txt");
        let err = blocking(move || request_register(&h, &missing, None))
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(msg) if msg.contains("not found")));

        let h = home.path().to_path_buf();
        let listed = blocking(move || request_list(&h, false)).await.unwrap();
        assert_eq!(listed.len(), 1);

        let (h, p) = (home.path().to_path_buf(), path.clone());
        assert!(blocking(move || request_deregister(&h, &p)).await.unwrap());

        let h = home.path().to_path_buf();
        assert!(blocking(move || request_list(&h, false))
            .await
            .unwrap()
            .is_empty());
        let h = home.path().to_path_buf();
        let all = blocking(move || request_list(&h, true)).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_deleted);

        let (h, id) = (home.path().to_path_buf(), record.id);
        let purged = blocking(move || request_purge(&h, id)).await.unwrap();
        assert_eq!(purged.map(|r| r.id), Some(record.id));

        let h = home.path().to_path_buf();
        let unknown = blocking(move || send_request(&h, &DaemonRequest::new("bogus")))
            .await
            .unwrap();
        assert!(!unknown.ok);

        let h = home.path().to_path_buf();
        blocking(move || request_stop(&h)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(10), daemon)
            .await
            .expect("daemon exits after stop")
            .expect("join")
            .expect("daemon result");
        assert!(!socket_path(home.path()).exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn status_reports_startup_sweep() {
        let home = TempDir::new().unwrap();
        write_config(home.path(), 3600);

        let daemon = tokio::spawn(run(home.path().to_path_buf()));
        wait_for_socket(home.path()).await;

        let mut sweep = Value::Null;
        for _ in 0..50 {
            let h = home.path().to_path_buf();
            let status = blocking(move || request_status(&h)).await.unwrap();
            if !status["last_sweep"].is_null() {
                sweep = status["last_sweep"].clone();
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(sweep["checked"], json!(0));

        let h = home.path().to_path_buf();
        blocking(move || request_stop(&h)).await.unwrap();
        daemon.await.expect("join").expect("daemon result");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn misbehaving_clients_do_not_stop_the_server() {
        let home = TempDir::new().unwrap();
        write_config(home.path(), 3600);

        let daemon = tokio::spawn(run(home.path().to_path_buf()));
        wait_for_socket(home.path()).await;

        let socket = socket_path(home.path());
        blocking(move || {
            // Hang up without sending anything.
            drop(StdUnixStream::connect(&socket).unwrap());

            // Bytes that are not UTF-8 end that client's session.
            let mut raw = StdUnixStream::connect(&socket).unwrap();
            raw.write_all(&[0xff, 0xfe, b'\n']).unwrap();
            drop(raw);

            // Malformed JSON gets an error line; the connection stays usable.
            let mut garbled = StdUnixStream::connect(&socket).unwrap();
            garbled.write_all(b"{not json\n").unwrap();
            garbled.shutdown(std::net::Shutdown::Write).unwrap();
            let mut reply = String::new();
            garbled.read_to_string(&mut reply).unwrap();
            assert!(reply.contains("invalid request JSON"), "got: {reply}");
        })
        .await;

        let h = home.path().to_path_buf();
        let status = blocking(move || request_status(&h)).await.unwrap();
        assert_eq!(status["running"], json!(true));

        let h = home.path().to_path_buf();
        blocking(move || request_stop(&h)).await.unwrap();
        daemon.await.expect("join").expect("daemon result");
    }
}
