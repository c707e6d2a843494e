use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use fim_core::{FileRecord, RecordId};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// JSON newline-delimited request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all: Option<bool>,
}

impl DaemonRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Self::default()
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Daemon status; retries briefly so a freshly spawned daemon has time to bind.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::new("status");

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    let response = send_request(home, &DaemonRequest::new("stop"))?;
    response_into_data(response).map(|_| ())
}

pub fn request_register(
    home: &Path,
    path: &Path,
    host: Option<String>,
) -> Result<FileRecord, DaemonError> {
    let response = send_request(
        home,
        &DaemonRequest {
            path: Some(path.to_string_lossy().into_owned()),
            host,
            ..DaemonRequest::new("register")
        },
    )?;
    response_into(response)
}

/// Returns whether a tracked record was flagged deleted.
pub fn request_deregister(home: &Path, path: &Path) -> Result<bool, DaemonError> {
    let response = send_request(
        home,
        &DaemonRequest {
            path: Some(path.to_string_lossy().into_owned()),
            ..DaemonRequest::new("deregister")
        },
    )?;
    let data = response_into_data(response)?;
    Ok(data
        .get("deregistered")
        .and_then(Value::as_bool)
        .unwrap_or(false))
}

pub fn request_list(home: &Path, all: bool) -> Result<Vec<FileRecord>, DaemonError> {
    let response = send_request(
        home,
        &DaemonRequest {
            all: all.then_some(true),
            ..DaemonRequest::new("list")
        },
    )?;
    response_into(response)
}

/// Returns the removed record, or `None` when the id is unknown.
pub fn request_purge(home: &Path, id: RecordId) -> Result<Option<FileRecord>, DaemonError> {
    let response = send_request(
        home,
        &DaemonRequest {
            id: Some(id.0),
            ..DaemonRequest::new("purge")
        },
    )?;
    response_into(response)
}

fn response_into<T: DeserializeOwned>(response: DaemonResponse) -> Result<T, DaemonError> {
    Ok(serde_json::from_value(response_into_data(response)?)?)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn request_omits_unset_fields() {
        let line = serde_json::to_string(&DaemonRequest::new("status")).unwrap();
        assert_eq!(line, r#"{"cmd":"status"}"#);
    }

    #[test]
    fn request_parses_with_missing_fields() {
        let request: DaemonRequest =
            serde_json::from_str(r#"{"cmd":"register","path":"/etc/hosts"}"#).unwrap();
        assert_eq!(request.cmd, "register");
        assert_eq!(request.path.as_deref(), Some("/etc/hosts"));
        assert!(request.host.is_none());
        assert!(request.id.is_none());
    }

    #[test]
    fn error_response_becomes_protocol_error() {
        let err = response_into_data(DaemonResponse::error("boom")).unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(msg) if msg == "boom"));
    }

    #[test]
    fn null_purge_result_is_none() {
        let purged: Option<FileRecord> =
            response_into(DaemonResponse::ok(Value::Null)).unwrap();
        assert!(purged.is_none());
    }

    #[test]
    fn ok_response_without_data_is_null() {
        let response = DaemonResponse {
            ok: true,
            data: None,
            error: None,
        };
        assert_eq!(response_into_data(response).unwrap(), Value::Null);
        assert_eq!(
            response_into_data(DaemonResponse::ok(json!({"a": 1}))).unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn missing_socket_reports_not_running() {
        let home = TempDir::new().unwrap();
        let err = send_request(home.path(), &DaemonRequest::new("status")).unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
    }
}
