use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use appdock_core::paths::socket_path;
use appdock_core::{CatalogStore, Params, StoreError};
use appdock_install::InstallRequest;

use crate::error::{io_err, DaemonError};

/// JSON newline-delimited request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    /// Installation name for `relaunch` / `uninstall`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallSpec>,
}

impl DaemonRequest {
    pub fn new(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
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

/// An install request addressed by application key and version string, the
/// way users name things; resolved to catalog ids on the serving side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallSpec {
    pub app: String,
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_port: Option<u16>,
}

impl InstallSpec {
    pub fn resolve(self, catalog: &dyn CatalogStore) -> Result<InstallRequest, StoreError> {
        let app = catalog.app_by_key(&self.app)?;
        let app_id = app
            .id
            .ok_or_else(|| StoreError::not_found("application", &self.app))?;
        let version_id = catalog
            .versions_of(app_id)?
            .into_iter()
            .find(|v| v.version == self.version)
            .and_then(|v| v.id)
            .ok_or_else(|| {
                StoreError::not_found("version", format!("{}@{}", self.app, self.version))
            })?;
        Ok(InstallRequest {
            version_id,
            name: self.name,
            params: self.params,
            http_port: self.http_port,
            https_port: self.https_port,
        })
    }
}

/// Whether a daemon answers on the socket under `home`.
pub fn is_running(home: &Path) -> bool {
    let socket = socket_path(home);
    socket.exists() && UnixStream::connect(&socket).is_ok()
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

/// `status`, retried briefly so a just-spawned daemon has time to bind.
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

pub fn request_sync(home: &Path) -> Result<Value, DaemonError> {
    let response = send_request(home, &DaemonRequest::new("sync"))?;
    response_into_data(response)
}

pub fn request_install(home: &Path, spec: InstallSpec) -> Result<Value, DaemonError> {
    let request = DaemonRequest {
        install: Some(spec),
        ..DaemonRequest::new("install")
    };
    response_into_data(send_request(home, &request)?)
}

pub fn request_relaunch(home: &Path, name: &str) -> Result<Value, DaemonError> {
    named(home, "relaunch", name)
}

pub fn request_uninstall(home: &Path, name: &str) -> Result<Value, DaemonError> {
    named(home, "uninstall", name)
}

fn named(home: &Path, cmd: &str, name: &str) -> Result<Value, DaemonError> {
    let request = DaemonRequest {
        name: Some(name.to_string()),
        ..DaemonRequest::new(cmd)
    };
    response_into_data(send_request(home, &request)?)
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
    fn minimal_request_omits_optional_fields() {
        let encoded = serde_json::to_value(DaemonRequest::new("status")).unwrap();
        assert_eq!(encoded, json!({"cmd": "status"}));
    }

    #[test]
    fn install_request_parses_with_defaults() {
        let req: DaemonRequest = serde_json::from_value(json!({
            "cmd": "install",
            "install": {"app": "wordpress", "version": "6.0", "name": "blog1"}
        }))
        .unwrap();
        let spec = req.install.unwrap();
        assert_eq!(spec.app, "wordpress");
        assert!(spec.params.is_empty());
        assert_eq!(spec.http_port, None);
    }

    #[test]
    fn missing_socket_means_not_running() {
        let home = TempDir::new().unwrap();
        assert!(!is_running(home.path()));
        assert!(matches!(
            send_request(home.path(), &DaemonRequest::new("status")),
            Err(DaemonError::DaemonNotRunning { .. })
        ));
    }

    #[test]
    fn failed_response_becomes_protocol_error() {
        let err = response_into_data(DaemonResponse::error("boom")).unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(ref m) if m == "boom"));
    }
}
