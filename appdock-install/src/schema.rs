//! Parameter schema (`config.json`) of a catalog version.
//!
//! ```json
//! { "formFields": [
//!     { "envKey": "PANEL_DB_HOST", "type": "service", "key": "mysql", "required": true },
//!     { "envKey": "PANEL_APP_PORT_HTTP", "type": "number", "default": 8080 }
//! ] }
//! ```

use serde::{Deserialize, Serialize};

use appdock_core::Params;

use crate::error::InstallError;

/// Field type naming a dependency installation by its service name.
pub const SERVICE_FIELD: &str = "service";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSchema {
    #[serde(default)]
    pub form_fields: Vec<FormField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    pub env_key: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// For `service` fields: the application key the dependency must be.
    #[serde(default)]
    pub key: String,
}

impl FormField {
    pub fn is_service(&self) -> bool {
        self.field_type == SERVICE_FIELD
    }
}

fn is_blank(value: Option<&serde_json::Value>) -> bool {
    match value {
        None | Some(serde_json::Value::Null) => true,
        Some(serde_json::Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

impl FormSchema {
    /// Parse a raw schema; an empty document is an empty schema.
    pub fn parse(raw: &str) -> Result<Self, InstallError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).map_err(InstallError::Schema)
    }

    /// Fill blank parameters from field defaults.
    pub fn apply_defaults(&self, params: &mut Params) {
        for field in &self.form_fields {
            let Some(default) = field.default.as_ref() else {
                continue;
            };
            if is_blank(params.get(&field.env_key)) && !is_blank(Some(default)) {
                params.insert(field.env_key.clone(), default.clone());
            }
        }
    }

    /// Every required field must carry a non-blank value.
    pub fn check_required(&self, params: &Params) -> Result<(), InstallError> {
        let missing: Vec<&str> = self
            .form_fields
            .iter()
            .filter(|f| f.required && is_blank(params.get(&f.env_key)))
            .map(|f| f.env_key.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(InstallError::RequirementUnmet(format!(
                "missing required parameter(s): {}",
                missing.join(", ")
            )))
        }
    }

    pub fn service_fields(&self) -> impl Iterator<Item = &FormField> {
        self.form_fields.iter().filter(|f| f.is_service())
    }
}
