//! Compose rendering: per-install renaming of a version's compose template.
//!
//! The template is kept as an ordered YAML mapping; only the keys of the
//! `services` mapping and the top-level `name` are touched, every service
//! body is carried through verbatim. The first service in document order is
//! the installation's primary service.
//!
//! The compose project `name` is always the install name itself, so two
//! installations never share a project (and `down --remove-orphans` on one
//! never reaches the other's containers).

use std::collections::HashSet;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_yaml::{Mapping, Value};

use appdock_core::Params;

use crate::error::RenderError;

/// Parameter key the primary container name is injected under.
pub const CONTAINER_NAME_KEY: &str = "CONTAINER_NAME";

const TOKEN_LEN: usize = 4;
/// Collisions tolerated at one token length before the token grows.
const ATTEMPTS_PER_LEN: usize = 16;

// ---------------------------------------------------------------------------
// ComposeDocument
// ---------------------------------------------------------------------------

/// A parsed compose document with a guaranteed `services` mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposeDocument {
    root: Mapping,
}

impl ComposeDocument {
    /// Parse `text`, failing with [`RenderError::TemplateMalformed`] when it
    /// is not a mapping or lacks a `services` mapping.
    pub fn parse(text: &str) -> Result<Self, RenderError> {
        let value: Value = serde_yaml::from_str(text)
            .map_err(|e| RenderError::TemplateMalformed(e.to_string()))?;
        let Value::Mapping(root) = value else {
            return Err(RenderError::TemplateMalformed(
                "top level is not a mapping".to_string(),
            ));
        };
        match root.get("services") {
            Some(Value::Mapping(services)) => {
                if services.keys().any(|k| k.as_str().is_none()) {
                    return Err(RenderError::TemplateMalformed(
                        "service names must be strings".to_string(),
                    ));
                }
                Ok(Self { root })
            }
            Some(_) => Err(RenderError::TemplateMalformed(
                "`services` is not a mapping".to_string(),
            )),
            None => Err(RenderError::TemplateMalformed(
                "no `services` mapping".to_string(),
            )),
        }
    }

    fn services(&self) -> Option<&Mapping> {
        self.root.get("services").and_then(Value::as_mapping)
    }

    /// Service names in declaration order.
    pub fn service_names(&self) -> Vec<String> {
        self.services()
            .into_iter()
            .flat_map(Mapping::keys)
            .filter_map(|k| k.as_str().map(str::to_owned))
            .collect()
    }

    /// Body of one service.
    pub fn service(&self, name: &str) -> Option<&Value> {
        self.services()?.get(name)
    }

    /// Compose project name (top-level `name`), if declared.
    pub fn project_name(&self) -> Option<&str> {
        self.root.get("name").and_then(Value::as_str)
    }

    /// Rename service keys per `renames`, keeping order and bodies.
    pub fn rename_services(&mut self, renames: &[(String, String)]) {
        let Some(services) = self.services() else {
            return;
        };
        let mut rebuilt = Mapping::with_capacity(services.len());
        for (key, body) in services {
            let name = key.as_str().unwrap_or_default();
            let new_name = renames
                .iter()
                .find(|(old, _)| old == name)
                .map(|(_, new)| new.as_str())
                .unwrap_or(name);
            rebuilt.insert(Value::String(new_name.to_string()), body.clone());
        }
        self.root
            .insert(Value::String("services".to_string()), Value::Mapping(rebuilt));
    }

    /// Set the compose project name, replacing any declared one.
    ///
    /// The key is placed first so the rendered file reads naturally.
    pub fn set_project_name(&mut self, name: &str) {
        let mut root = Mapping::with_capacity(self.root.len() + 1);
        root.insert(
            Value::String("name".to_string()),
            Value::String(name.to_string()),
        );
        for (k, v) in std::mem::take(&mut self.root) {
            if k.as_str() != Some("name") {
                root.insert(k, v);
            }
        }
        self.root = root;
    }

    pub fn to_yaml(&self) -> Result<String, RenderError> {
        Ok(serde_yaml::to_string(&self.root)?)
    }
}

// ---------------------------------------------------------------------------
// Rendered output
// ---------------------------------------------------------------------------

/// A per-install compose unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedUnit {
    /// Rewritten compose document, ready to be written to disk.
    pub compose: String,
    /// `(original, renamed)` pairs in declaration order.
    pub service_names: Vec<(String, String)>,
    /// Renamed key of the primary service.
    pub primary_service: String,
    /// Container name bound through [`CONTAINER_NAME_KEY`].
    pub container_name: String,
}

impl RenderedUnit {
    pub fn renamed(&self, original: &str) -> Option<&str> {
        self.service_names
            .iter()
            .find(|(old, _)| old == original)
            .map(|(_, new)| new.as_str())
    }
}

// ---------------------------------------------------------------------------
// ComposeRenderer
// ---------------------------------------------------------------------------

/// Produces uniquely named compose units from version templates.
#[derive(Debug, Clone)]
pub struct ComposeRenderer {
    container_prefix: String,
}

impl ComposeRenderer {
    pub fn new(container_prefix: impl Into<String>) -> Self {
        Self {
            container_prefix: container_prefix.into(),
        }
    }

    /// Render `template` for `install_name`.
    ///
    /// `taken` holds service and container names already used by other
    /// installations; generated names never collide with them. The primary
    /// container name is inserted into `params` under [`CONTAINER_NAME_KEY`].
    pub fn render(
        &self,
        template: &str,
        install_name: &str,
        params: &mut Params,
        taken: &HashSet<String>,
    ) -> Result<RenderedUnit, RenderError> {
        self.render_with_rng(template, install_name, params, taken, &mut rand::thread_rng())
    }

    pub fn render_with_rng<R: Rng + ?Sized>(
        &self,
        template: &str,
        install_name: &str,
        params: &mut Params,
        taken: &HashSet<String>,
        rng: &mut R,
    ) -> Result<RenderedUnit, RenderError> {
        if !is_project_name(install_name) {
            return Err(RenderError::InvalidProjectName(install_name.to_string()));
        }
        let mut doc = ComposeDocument::parse(template)?;
        let originals = doc.service_names();
        let Some(primary) = originals.first().cloned() else {
            return Err(RenderError::TemplateMalformed(
                "`services` mapping is empty".to_string(),
            ));
        };

        let mut used: HashSet<String> = taken.iter().cloned().collect();
        used.extend(originals.iter().cloned());

        let mut service_names = Vec::with_capacity(originals.len());
        for name in &originals {
            let renamed = unique_name(rng, &used, |token| format!("{name}-{token}"));
            used.insert(renamed.clone());
            service_names.push((name.clone(), renamed));
        }
        let container_name = unique_name(rng, &used, |token| {
            format!("{}{primary}-{token}", self.container_prefix)
        });

        doc.rename_services(&service_names);
        doc.set_project_name(install_name);
        params.insert(
            CONTAINER_NAME_KEY.to_string(),
            serde_json::Value::String(container_name.clone()),
        );

        let primary_service = service_names[0].1.clone();
        Ok(RenderedUnit {
            compose: doc.to_yaml()?,
            service_names,
            primary_service,
            container_name,
        })
    }
}

fn random_token<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from(rng.sample(Alphanumeric)).to_ascii_lowercase())
        .collect()
}

fn unique_name<R: Rng + ?Sized>(
    rng: &mut R,
    used: &HashSet<String>,
    build: impl Fn(&str) -> String,
) -> String {
    let mut len = TOKEN_LEN;
    loop {
        for _ in 0..ATTEMPTS_PER_LEN {
            let candidate = build(&random_token(rng, len));
            if !used.contains(&candidate) {
                return candidate;
            }
        }
        len += 1;
    }
}

/// Whether `name` is usable verbatim as a compose project name: lowercase
/// letters, digits, `-` and `_`, starting with a letter or digit.
pub fn is_project_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const TWO_SERVICES: &str = "\
services:
  web:
    image: nginx
    container_name: ${CONTAINER_NAME}
  db:
    image: mysql
networks:
  default:
    external: true
";

    #[test]
    fn parse_requires_services() {
        let err = ComposeDocument::parse("version: '3'\n").unwrap_err();
        assert!(matches!(err, RenderError::TemplateMalformed(_)));
        let err = ComposeDocument::parse("services: [a, b]\n").unwrap_err();
        assert!(matches!(err, RenderError::TemplateMalformed(_)));
        let err = ComposeDocument::parse("- just\n- a list\n").unwrap_err();
        assert!(matches!(err, RenderError::TemplateMalformed(_)));
    }

    #[test]
    fn service_names_follow_declaration_order() {
        let doc = ComposeDocument::parse(TWO_SERVICES).expect("parse");
        assert_eq!(doc.service_names(), vec!["web", "db"]);
    }

    #[test]
    fn document_without_services_reads_as_empty() {
        let mut doc = ComposeDocument { root: Mapping::new() };
        assert!(doc.service_names().is_empty());
        assert!(doc.service("web").is_none());
        doc.rename_services(&[("web".into(), "web-x1".into())]);
        assert_eq!(doc, ComposeDocument { root: Mapping::new() });
    }

    #[test]
    fn rename_preserves_bodies_and_order() {
        let mut doc = ComposeDocument::parse(TWO_SERVICES).expect("parse");
        let body = doc.service("db").cloned();
        doc.rename_services(&[
            ("web".into(), "web-x1".into()),
            ("db".into(), "db-x2".into()),
        ]);
        assert_eq!(doc.service_names(), vec!["web-x1", "db-x2"]);
        assert_eq!(doc.service("db-x2").cloned(), body);
    }

    #[test]
    fn project_name_is_inserted_first_and_replaces_declared_one() {
        let mut doc = ComposeDocument::parse(TWO_SERVICES).expect("parse");
        doc.set_project_name("blog1");
        assert_eq!(doc.project_name(), Some("blog1"));
        assert!(doc.to_yaml().unwrap().starts_with("name: blog1"));

        doc.set_project_name("other");
        assert_eq!(doc.project_name(), Some("other"));
        assert!(doc.to_yaml().unwrap().starts_with("name: other"));
        assert_eq!(doc.service_names(), vec!["web", "db"]);
    }

    #[test]
    fn project_name_alphabet() {
        assert!(is_project_name("blog1"));
        assert!(is_project_name("my-site_2"));
        assert!(is_project_name("9lives"));
        assert!(!is_project_name(""));
        assert!(!is_project_name("Blog"));
        assert!(!is_project_name("my.site"));
        assert!(!is_project_name("-lead"));
        assert!(!is_project_name("_lead"));
        assert!(!is_project_name("a b"));
    }

    #[test]
    fn names_that_would_alias_a_project_are_rejected() {
        let renderer = ComposeRenderer::new("appdock-");
        for name in ["Blog", "my.site"] {
            let err = renderer
                .render(TWO_SERVICES, name, &mut Params::new(), &HashSet::new())
                .unwrap_err();
            assert!(matches!(err, RenderError::InvalidProjectName(_)), "{name}: {err}");
        }
        let project = |name: &str| {
            let unit = renderer
                .render(TWO_SERVICES, name, &mut Params::new(), &HashSet::new())
                .expect("render");
            ComposeDocument::parse(&unit.compose)
                .expect("parse")
                .project_name()
                .map(str::to_owned)
        };
        assert_eq!(project("my-site").as_deref(), Some("my-site"));
        assert_eq!(project("my_site").as_deref(), Some("my_site"));
    }

    #[test]
    fn template_declared_project_name_is_replaced() {
        let template = format!("name: shared\n{TWO_SERVICES}");
        let unit = ComposeRenderer::new("appdock-")
            .render(&template, "site", &mut Params::new(), &HashSet::new())
            .expect("render");
        let doc = ComposeDocument::parse(&unit.compose).expect("parse");
        assert_eq!(doc.project_name(), Some("site"));
    }

    #[test]
    fn render_is_deterministic_under_seeded_rng() {
        let renderer = ComposeRenderer::new("appdock-");
        let render = || {
            let mut params = Params::new();
            renderer
                .render_with_rng(
                    TWO_SERVICES,
                    "site",
                    &mut params,
                    &HashSet::new(),
                    &mut StdRng::seed_from_u64(7),
                )
                .expect("render")
        };
        assert_eq!(render(), render());
    }

    #[test]
    fn taken_names_are_avoided() {
        let renderer = ComposeRenderer::new("appdock-");
        let first = renderer
            .render_with_rng(
                TWO_SERVICES,
                "a",
                &mut Params::new(),
                &HashSet::new(),
                &mut StdRng::seed_from_u64(1),
            )
            .expect("render");
        let taken: HashSet<String> = first
            .service_names
            .iter()
            .map(|(_, n)| n.clone())
            .chain(std::iter::once(first.container_name.clone()))
            .collect();
        // Same seed would reproduce the same names; `taken` must force new ones.
        let second = renderer
            .render_with_rng(
                TWO_SERVICES,
                "b",
                &mut Params::new(),
                &taken,
                &mut StdRng::seed_from_u64(1),
            )
            .expect("render");
        for (_, name) in &second.service_names {
            assert!(!taken.contains(name), "{name} reused");
        }
        assert!(!taken.contains(&second.container_name));
    }
}
