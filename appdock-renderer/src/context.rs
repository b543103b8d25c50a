//! Template contexts: serializable payloads handed to tera.

use serde::{Deserialize, Serialize};

use appdock_core::Params;

use crate::error::RenderError;

/// One `KEY=value` line of an install's `.env` file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvEntry {
    pub key: String,
    pub value: String,
}

/// Payload for the embedded `env` template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvContext {
    pub install_name: String,
    pub entries: Vec<EnvEntry>,
}

impl EnvContext {
    /// Build from an install's parameter snapshot; entries follow key order.
    pub fn from_params(install_name: &str, params: &Params) -> Self {
        let entries = params
            .iter()
            .map(|(key, value)| EnvEntry {
                key: key.clone(),
                value: env_value(value),
            })
            .collect();
        Self {
            install_name: install_name.to_string(),
            entries,
        }
    }

    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        Ok(tera::Context::from_serialize(self)?)
    }
}

/// Variables available to the manifest and bundle URL templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlContext {
    pub repo_url: String,
    pub mode: String,
    pub system_version: String,
    /// Catalog release; only set when building a bundle URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl UrlContext {
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        Ok(tera::Context::from_serialize(self)?)
    }
}

/// Render one parameter value for a dotenv file.
///
/// Plain tokens are written bare; anything compose would split or expand is
/// double-quoted with `\`, `"` and `$` escaped.
pub fn env_value(value: &serde_json::Value) -> String {
    let raw = match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => other.to_string(),
    };
    let needs_quotes = raw
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '$' | '\\' | '`'));
    if !needs_quotes {
        return raw;
    }
    let mut quoted = String::with_capacity(raw.len() + 2);
    quoted.push('"');
    for c in raw.chars() {
        match c {
            '"' | '\\' | '$' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\n' => quoted.push_str("\\n"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
