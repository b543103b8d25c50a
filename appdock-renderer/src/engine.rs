//! Tera text rendering: install `.env` files and catalog URLs.
//!
//! Built-in templates are embedded; a user directory of `.tera` files may
//! override them by name (`env.tera` replaces `env`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tera::Tera;

use appdock_core::Params;

use crate::context::{EnvContext, UrlContext};
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[("env", include_str!("templates/env.tera"))];

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.into(),
        source,
    }
}

fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut templates = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let path = entry.map_err(|e| io_err(dir, e))?.path();
        if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((stem.to_lowercase(), contents));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = TPLS
        .iter()
        .map(|(name, body)| ((*name).to_string(), (*body).to_string()))
        .collect();
    if let Some(dir) = user_template_dir {
        templates.extend(load_user_templates(dir)?);
    }
    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    tera.add_raw_templates(templates.into_iter().collect::<Vec<_>>())?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Tera engine holding the embedded templates plus any user overrides.
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    pub fn new(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(TemplateEngine {
            tera: build_tera(user_template_dir)?,
        })
    }

    /// Render the `.env` file for an installation from its parameters.
    pub fn render_env(&self, install_name: &str, params: &Params) -> Result<String, RenderError> {
        let ctx = EnvContext::from_params(install_name, params).to_tera_context()?;
        Ok(self.tera.render("env", &ctx)?)
    }

    /// Expand a URL template such as `{{ repo_url }}/{{ mode }}/apps.json`.
    pub fn render_url(&self, template: &str, ctx: &UrlContext) -> Result<String, RenderError> {
        Ok(Tera::one_off(template, &ctx.to_tera_context()?, false)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn env_lists_every_param() {
        let engine = TemplateEngine::new(None).expect("engine");
        let mut params = Params::new();
        params.insert("CONTAINER_NAME".into(), json!("appdock-web-ab12"));
        params.insert("PANEL_APP_PORT_HTTP".into(), json!(8080));
        let out = engine.render_env("blog", &params).expect("render");
        assert!(out.starts_with("# Generated by appdock for installation 'blog'."));
        assert!(out.contains("CONTAINER_NAME=appdock-web-ab12\n"));
        assert!(out.contains("PANEL_APP_PORT_HTTP=8080\n"));
    }

    #[test]
    fn env_values_are_not_html_escaped() {
        let engine = TemplateEngine::new(None).expect("engine");
        let mut params = Params::new();
        params.insert("URL".into(), json!("http://a/?x=1&y=<2>"));
        let out = engine.render_env("x", &params).expect("render");
        assert!(out.contains("URL=http://a/?x=1&y=<2>"));
    }

    #[test]
    fn url_template_expands_fields() {
        let engine = TemplateEngine::new(None).expect("engine");
        let ctx = UrlContext {
            repo_url: "https://repo".into(),
            mode: "stable".into(),
            system_version: "v1.0.0".into(),
            version: Some("1.2".into()),
        };
        let url = engine
            .render_url(
                "{{ repo_url }}/{{ mode }}/{{ system_version }}/apps-{{ version }}.tar.gz",
                &ctx,
            )
            .expect("render");
        assert_eq!(url, "https://repo/stable/v1.0.0/apps-1.2.tar.gz");
    }

    #[test]
    fn user_override_replaces_embedded_env() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        std::fs::write(
            dir.path().join("env.tera"),
            "{% for e in entries %}export {{ e.key }}={{ e.value }}\n{% endfor %}",
        )
        .expect("write");
        let engine = TemplateEngine::new(Some(dir.path())).expect("engine");
        let mut params = Params::new();
        params.insert("A".into(), json!("1"));
        assert_eq!(engine.render_env("x", &params).expect("render"), "export A=1\n");
    }
}
