use std::collections::HashSet;

use appdock_core::Params;
use appdock_renderer::{ComposeDocument, ComposeRenderer, RenderError, CONTAINER_NAME_KEY};
use rstest::rstest;

const WORDPRESS: &str = "\
services:
  wordpress:
    image: wordpress:6
    container_name: ${CONTAINER_NAME}
    ports:
      - \"${PANEL_APP_PORT_HTTP}:80\"
    depends_on:
      - mysql
  mysql:
    image: mysql:8
    environment:
      MYSQL_ROOT_PASSWORD: secret
";

fn renderer() -> ComposeRenderer {
    ComposeRenderer::new("appdock-")
}

#[test]
fn renamed_services_form_a_bijection() {
    let mut params = Params::new();
    let unit = renderer()
        .render(WORDPRESS, "blog1", &mut params, &HashSet::new())
        .expect("render");

    let doc = ComposeDocument::parse(&unit.compose).expect("rendered doc parses");
    let keys = doc.service_names();
    assert_eq!(keys.len(), 2);
    assert!(!keys.contains(&"wordpress".to_string()));
    assert!(!keys.contains(&"mysql".to_string()));

    let originals: HashSet<_> = unit.service_names.iter().map(|(o, _)| o.clone()).collect();
    let renamed: HashSet<_> = unit.service_names.iter().map(|(_, n)| n.clone()).collect();
    assert_eq!(originals.len(), 2);
    assert_eq!(renamed.len(), 2);
    assert_eq!(renamed, keys.into_iter().collect::<HashSet<_>>());
}

#[test]
fn primary_is_first_declared_service() {
    let mut params = Params::new();
    let unit = renderer()
        .render(WORDPRESS, "blog1", &mut params, &HashSet::new())
        .expect("render");

    let suffix = unit
        .primary_service
        .strip_prefix("wordpress-")
        .expect("primary keeps original key as prefix");
    assert_eq!(suffix.len(), 4);
    assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    assert_eq!(unit.renamed("wordpress"), Some(unit.primary_service.as_str()));
}

#[test]
fn container_name_is_prefixed_and_injected() {
    let mut params = Params::new();
    let unit = renderer()
        .render(WORDPRESS, "blog1", &mut params, &HashSet::new())
        .expect("render");

    assert!(unit.container_name.starts_with("appdock-wordpress-"));
    assert_eq!(
        params.get(CONTAINER_NAME_KEY).and_then(|v| v.as_str()),
        Some(unit.container_name.as_str())
    );
}

#[test]
fn service_bodies_survive_rendering() {
    let mut params = Params::new();
    let unit = renderer()
        .render(WORDPRESS, "blog1", &mut params, &HashSet::new())
        .expect("render");
    let source = ComposeDocument::parse(WORDPRESS).expect("parse");
    let rendered = ComposeDocument::parse(&unit.compose).expect("parse");

    let mysql = unit.renamed("mysql").expect("mysql renamed");
    assert_eq!(rendered.service(mysql), source.service("mysql"));
    assert!(unit.compose.contains("${CONTAINER_NAME}"));
    assert_eq!(rendered.project_name(), Some("blog1"));
}

#[test]
fn reinstalling_same_template_yields_fresh_names() {
    let first = renderer()
        .render(WORDPRESS, "a", &mut Params::new(), &HashSet::new())
        .expect("render");
    let taken: HashSet<String> = first
        .service_names
        .iter()
        .map(|(_, n)| n.clone())
        .chain([first.container_name.clone()])
        .collect();
    let second = renderer()
        .render(WORDPRESS, "b", &mut Params::new(), &taken)
        .expect("render");
    assert!(second.service_names.iter().all(|(_, n)| !taken.contains(n)));
    assert!(!taken.contains(&second.container_name));
}

#[rstest]
#[case::no_services("version: '3'\nvolumes: {}\n")]
#[case::services_is_list("services:\n  - web\n")]
#[case::empty_services("services: {}\n")]
#[case::not_yaml("services: [unterminated\n")]
#[case::scalar_root("just text\n")]
fn malformed_templates_are_rejected(#[case] template: &str) {
    let err = renderer()
        .render(template, "x", &mut Params::new(), &HashSet::new())
        .unwrap_err();
    assert!(matches!(err, RenderError::TemplateMalformed(_)), "got {err}");
}
