//! # appdock-renderer
//!
//! Turns a catalog version into a per-install deployable unit.
//!
//! - [`compose`] renames the services of a compose template so every
//!   installation gets globally unique service and container names.
//! - [`engine`] renders text artifacts (`.env`, catalog URLs) with tera.
//!
//! ```rust,no_run
//! use std::collections::HashSet;
//! use appdock_core::Params;
//! use appdock_renderer::ComposeRenderer;
//!
//! let template = "services:\n  web:\n    image: nginx\n";
//! let mut params = Params::new();
//! let unit = ComposeRenderer::new("appdock-")
//!     .render(template, "site", &mut params, &HashSet::new())
//!     .expect("valid template");
//! println!("{}", unit.primary_service);
//! ```

pub mod compose;
pub mod context;
pub mod engine;
pub mod error;

pub use compose::{
    is_project_name, ComposeDocument, ComposeRenderer, RenderedUnit, CONTAINER_NAME_KEY,
};
pub use context::{EnvContext, UrlContext};
pub use engine::TemplateEngine;
pub use error::RenderError;
