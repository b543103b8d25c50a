//! `appdock install`, `installs`, `relaunch`, `uninstall`.
//!
//! Each lifecycle command goes to the daemon when one is running; otherwise it
//! runs in-process and waits for the background work to finish.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};
use tokio::runtime::Runtime;

use appdock_core::{InstallStatus, InstallStore, Installation, Params};
use appdock_daemon::{
    is_running, request_install, request_relaunch, request_uninstall, InstallSpec,
};
use appdock_install::{Collaborators, Orchestrator};

use super::{home, print_json, Local};

/// Arguments for `appdock install`.
#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Application key.
    pub app: String,

    /// Version of the application.
    pub version: String,

    /// Unique installation name (lowercase letters, digits, `-`, `_`).
    #[arg(long)]
    pub name: String,

    /// Parameter as KEY=VALUE (repeatable). Numbers and booleans keep their type.
    #[arg(long = "param", value_parser = parse_param)]
    pub params: Vec<(String, Value)>,

    /// Host HTTP port (overrides PANEL_APP_PORT_HTTP).
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Host HTTPS port (overrides PANEL_APP_PORT_HTTPS).
    #[arg(long)]
    pub https_port: Option<u16>,

    /// Return once the installation is recorded; requires a running daemon.
    #[arg(long)]
    pub detach: bool,
}

impl InstallArgs {
    pub fn run(self) -> Result<()> {
        let spec = InstallSpec {
            app: self.app,
            version: self.version,
            name: self.name,
            params: self.params.into_iter().collect::<Params>(),
            http_port: self.http_port,
            https_port: self.https_port,
        };
        let home = home()?;

        if is_running(&home) {
            let record = request_install(&home, spec).context("daemon install failed")?;
            let install: Installation =
                serde_json::from_value(record).context("unexpected daemon response")?;
            print_recorded(&install);
            println!("the daemon is launching it; follow with `appdock installs`");
            return Ok(());
        }
        if self.detach {
            bail!("--detach needs a running daemon (`appdock daemon start`)");
        }

        let local = Local::open()?;
        let request = spec
            .resolve(local.store.as_ref())
            .context("cannot resolve application version")?;
        let runtime = runtime()?;
        let orchestrator = orchestrator(&local, &runtime)?;
        let (install, tasks) = orchestrator.install(request).context("install failed")?;
        print_recorded(&install);

        let status = runtime.block_on(tasks.wait());
        report_launch(local.store.as_ref(), &install.name, status)
    }
}

/// Arguments for `appdock relaunch` and `appdock uninstall`.
#[derive(Args, Debug)]
pub struct NameArgs {
    /// Installation name.
    pub name: String,
}

pub fn relaunch(args: NameArgs) -> Result<()> {
    let home = home()?;
    if is_running(&home) {
        request_relaunch(&home, &args.name).context("daemon relaunch failed")?;
        println!("relaunching '{}'", args.name);
        return Ok(());
    }

    let local = Local::open()?;
    let runtime = runtime()?;
    let orchestrator = orchestrator(&local, &runtime)?;
    let (install, launch) = orchestrator
        .relaunch(&args.name)
        .with_context(|| format!("cannot relaunch '{}'", args.name))?;
    println!("relaunching '{}'", install.name);
    let status = runtime
        .block_on(launch)
        .context("launch task failed")?;
    report_launch(local.store.as_ref(), &install.name, status)
}

pub fn uninstall(args: NameArgs) -> Result<()> {
    let home = home()?;
    if is_running(&home) {
        request_uninstall(&home, &args.name).context("daemon uninstall failed")?;
        println!("removing '{}'", args.name);
        return Ok(());
    }

    let local = Local::open()?;
    let runtime = runtime()?;
    let orchestrator = orchestrator(&local, &runtime)?;
    let (_, removal) = orchestrator
        .uninstall(&args.name)
        .with_context(|| format!("cannot uninstall '{}'", args.name))?;
    runtime
        .block_on(removal)
        .context("removal task failed")?
        .with_context(|| format!("failed to remove '{}'", args.name))?;
    println!("{} removed '{}'", "✓".green().bold(), args.name);
    Ok(())
}

fn runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn orchestrator(local: &Local, runtime: &Runtime) -> Result<Orchestrator> {
    Orchestrator::new(
        &local.home,
        local.settings.clone(),
        local.store.clone(),
        local.store.clone(),
        Collaborators::host(),
        runtime.handle().clone(),
    )
    .context("failed to set up the installer")
}

fn print_recorded(install: &Installation) {
    println!(
        "{} recorded '{}' ({} {}) as service {}",
        "✓".green().bold(),
        install.name,
        install.app_key,
        install.version,
        install.service_name
    );
}

fn report_launch(store: &dyn InstallStore, name: &str, status: InstallStatus) -> Result<()> {
    if status == InstallStatus::Running {
        println!("{} '{name}' is running", "✓".green().bold());
        return Ok(());
    }
    let message = store
        .install_by_name(name)
        .ok()
        .flatten()
        .and_then(|i| i.message)
        .unwrap_or_else(|| "unknown error".to_string());
    bail!("'{name}' failed to start: {message}; retry with `appdock relaunch {name}`")
}

fn parse_param(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    let value = match serde_json::from_str::<Value>(value) {
        Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
        _ => Value::String(value.to_string()),
    };
    Ok((key.to_string(), value))
}

// ---------------------------------------------------------------------------
// installs
// ---------------------------------------------------------------------------

/// Arguments for `appdock installs`.
#[derive(Args, Debug)]
pub struct InstallsArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct InstallRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "app")]
    app: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "ports")]
    ports: String,
    #[tabled(rename = "service")]
    service: String,
    #[tabled(rename = "updated")]
    updated: String,
    #[tabled(rename = "message")]
    message: String,
}

impl InstallsArgs {
    pub fn run(self) -> Result<()> {
        let local = Local::open()?;
        let mut installs = local
            .store
            .installs()
            .context("failed to load installations")?;
        installs.sort_by(|a, b| a.name.cmp(&b.name));

        if self.json {
            return print_json(&installs);
        }
        if installs.is_empty() {
            println!("No installations.");
            return Ok(());
        }

        let rows: Vec<InstallRow> = installs
            .into_iter()
            .map(|i| InstallRow {
                ports: i
                    .ports()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                status: status_label(i.status),
                updated: i.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                app: format!("{} {}", i.app_key, i.version),
                name: i.name,
                service: i.service_name,
                message: i.message.unwrap_or_default(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn status_label(status: InstallStatus) -> String {
    let label = status.to_string();
    match status {
        InstallStatus::Running => label.green().to_string(),
        InstallStatus::Installing => label.yellow().to_string(),
        InstallStatus::Error => label.red().bold().to_string(),
        InstallStatus::Removing => label.bright_black().to_string(),
    }
}
