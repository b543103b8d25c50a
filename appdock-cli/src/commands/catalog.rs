//! `appdock apps`, `appdock tags`, `appdock app`: catalog browsing.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use appdock_core::types::UNRANKED;
use appdock_sync::{AppQuery, Catalog};

use super::{print_json, Local};
use crate::AppTypeArg;

/// Arguments for `appdock apps`.
#[derive(Args, Debug)]
pub struct AppsArgs {
    /// Case-insensitive substring of the application name.
    #[arg(long)]
    pub name: Option<String>,

    /// Only applications carrying this tag key (repeatable; any matches).
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Only applications of this type.
    #[arg(long = "type")]
    pub app_type: Option<AppTypeArg>,

    /// Only applications with a recommendation rank.
    #[arg(long)]
    pub recommended: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct AppRow {
    #[tabled(rename = "key")]
    key: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "type")]
    app_type: String,
    #[tabled(rename = "rank")]
    rank: String,
    #[tabled(rename = "tags")]
    tags: String,
    #[tabled(rename = "description")]
    description: String,
}

impl AppsArgs {
    pub fn run(self) -> Result<()> {
        let local = Local::open()?;
        let query = AppQuery {
            name: self.name,
            tags: self.tags,
            app_type: self.app_type.map(|t| t.0),
            recommended: self.recommended,
        };
        let hits = Catalog::new(local.store.as_ref())
            .search(&query)
            .context("catalog search failed")?;

        if self.json {
            return print_json(&hits);
        }
        if hits.is_empty() {
            println!("No applications found. Run `appdock sync` to pull the catalog.");
            return Ok(());
        }

        let rows: Vec<AppRow> = hits
            .into_iter()
            .map(|hit| AppRow {
                rank: if hit.app.recommend < UNRANKED {
                    hit.app.recommend.to_string()
                } else {
                    "-".to_string()
                },
                tags: hit
                    .tags
                    .iter()
                    .map(|t| t.key.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                key: hit.app.key,
                name: hit.app.name,
                app_type: hit.app.app_type.to_string(),
                description: hit.app.short_desc,
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

/// Arguments for `appdock tags`.
#[derive(Args, Debug)]
pub struct TagsArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl TagsArgs {
    pub fn run(self) -> Result<()> {
        let local = Local::open()?;
        let tags = Catalog::new(local.store.as_ref())
            .tags()
            .context("failed to load tags")?;
        if self.json {
            return print_json(&tags);
        }
        if tags.is_empty() {
            println!("No tags. Run `appdock sync` to pull the catalog.");
            return Ok(());
        }
        for tag in tags {
            println!("{:<16} {}", tag.key.bold(), tag.name);
        }
        Ok(())
    }
}

/// Arguments for `appdock app`.
#[derive(Args, Debug)]
pub struct AppArgs {
    /// Application key.
    pub key: String,

    /// Show one version's parameter form instead of the version list.
    #[arg(long)]
    pub version: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl AppArgs {
    pub fn run(self) -> Result<()> {
        let local = Local::open()?;
        let catalog = Catalog::new(local.store.as_ref());
        let detail = catalog
            .app_detail(&self.key)
            .with_context(|| format!("unknown application '{}'", self.key))?;

        if let Some(version) = self.version {
            let app_id = detail
                .app
                .id
                .with_context(|| format!("application '{}' has no id", self.key))?;
            let version_detail = catalog
                .version_detail(local.store.as_ref(), app_id, &version)
                .with_context(|| format!("unknown version '{}@{version}'", self.key))?;
            if self.json {
                return print_json(&version_detail);
            }
            println!("{} {}", detail.app.name.bold(), version_detail.version.version);
            if !version_detail.enabled {
                println!("{}", "install limit reached".red());
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&version_detail.form)
                    .context("failed to render parameter form")?
            );
            return Ok(());
        }

        if self.json {
            return print_json(&detail);
        }
        let app = &detail.app;
        println!("{} ({})", app.name.bold(), app.key);
        println!("type:     {}", app.app_type);
        if !app.short_desc.is_empty() {
            println!("about:    {}", app.short_desc);
        }
        if !app.required.is_empty() {
            println!("requires: {}", app.required.join(", "));
        }
        if app.limit > 0 {
            println!("limit:    {}", app.limit);
        }
        if detail.versions.is_empty() {
            println!("versions: none");
        } else {
            println!("versions: {}", detail.versions.join(", "));
        }
        Ok(())
    }
}
