//! Host port resolution and conflict checks.

use std::net::TcpListener;

use appdock_core::{Installation, Params};

use crate::error::InstallError;

/// Answers whether a host port is held by something outside appdock.
pub trait PortProbe: Send + Sync {
    fn in_use(&self, port: u16) -> bool;
}

/// Probes by trying to bind the port on all interfaces.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProbe;

impl PortProbe for TcpProbe {
    fn in_use(&self, port: u16) -> bool {
        TcpListener::bind(("0.0.0.0", port)).is_err()
    }
}

fn parse_port(key: &str, value: &serde_json::Value) -> Result<Option<u16>, InstallError> {
    let invalid = |reason: &str| InstallError::InvalidParam {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    let n = match value {
        serde_json::Value::Null => return Ok(None),
        serde_json::Value::String(s) if s.trim().is_empty() => return Ok(None),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| invalid("not a port number"))?,
        serde_json::Value::Number(n) => n.as_u64().ok_or_else(|| invalid("not a port number"))?,
        _ => return Err(invalid("not a port number")),
    };
    match u16::try_from(n) {
        Ok(port) if port > 0 => Ok(Some(port)),
        _ => Err(invalid("out of range 1-65535")),
    }
}

/// Resolve the host port carried by `key`.
///
/// An explicit `override_port` wins and is written back into `params`, so the
/// rendered `.env` and the record agree.
pub fn resolve_port(
    key: &str,
    override_port: Option<u16>,
    params: &mut Params,
) -> Result<Option<u16>, InstallError> {
    if let Some(port) = override_port {
        if port == 0 {
            return Err(InstallError::InvalidParam {
                key: key.to_string(),
                reason: "out of range 1-65535".to_string(),
            });
        }
        params.insert(key.to_string(), serde_json::Value::from(port));
        return Ok(Some(port));
    }
    match params.get(key) {
        Some(value) => parse_port(key, value),
        None => Ok(None),
    }
}

/// Fail on the first requested port bound by an installation or the host.
pub fn check_ports(
    requested: &[u16],
    installs: &[Installation],
    probe: &dyn PortProbe,
) -> Result<(), InstallError> {
    for (i, port) in requested.iter().enumerate() {
        if requested[..i].contains(port) {
            return Err(InstallError::PortConflict(*port));
        }
        if installs.iter().any(|inst| inst.ports().any(|p| p == *port)) || probe.in_use(*port) {
            return Err(InstallError::PortConflict(*port));
        }
    }
    Ok(())
}
