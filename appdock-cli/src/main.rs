//! appdock: app store catalog and Docker Compose installer.
//!
//! # Usage
//!
//! ```text
//! appdock sync [--check]
//! appdock apps [--name <s>] [--tag <key> ...] [--type website|runtime|tool] [--recommended] [--json]
//! appdock tags [--json]
//! appdock app <key> [--version <v>] [--json]
//! appdock install <app> <version> --name <n> [--param K=V ...] [--http-port P] [--https-port P] [--detach]
//! appdock installs [--json]
//! appdock relaunch <name>
//! appdock uninstall <name>
//! appdock daemon start|stop|status
//! ```

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use appdock_core::AppType;
use commands::{
    catalog::{AppArgs, AppsArgs, TagsArgs},
    daemon::DaemonCommand,
    install::{InstallArgs, InstallsArgs, NameArgs},
    sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "appdock",
    version,
    about = "Browse an app store catalog and run its apps with Docker Compose",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pull the remote catalog if it is newer than the local one.
    Sync(SyncArgs),

    /// Search catalog applications.
    Apps(AppsArgs),

    /// List catalog tags.
    Tags(TagsArgs),

    /// Show one application and its versions.
    App(AppArgs),

    /// Install an application version under a new name.
    Install(InstallArgs),

    /// List installations.
    Installs(InstallsArgs),

    /// Retry the launch of a failed installation.
    Relaunch(NameArgs),

    /// Stop and remove an installation.
    Uninstall(NameArgs),

    /// Run or query the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Shared AppType argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `AppType` from CLI args.
#[derive(Debug, Clone, Copy)]
pub struct AppTypeArg(pub AppType);

impl FromStr for AppTypeArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "website" => Ok(Self(AppType::Website)),
            "runtime" => Ok(Self(AppType::Runtime)),
            "tool" => Ok(Self(AppType::Tool)),
            "other" => Ok(Self(AppType::Other)),
            other => Err(format!(
                "unknown app type '{other}'; expected: website, runtime, tool, other"
            )),
        }
    }
}

impl fmt::Display for AppTypeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    // The daemon installs its own subscriber at `info`.
    if !matches!(
        cli.command,
        Commands::Daemon {
            command: DaemonCommand::Start
        }
    ) {
        init_tracing();
    }
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::Apps(args) => args.run(),
        Commands::Tags(args) => args.run(),
        Commands::App(args) => args.run(),
        Commands::Install(args) => args.run(),
        Commands::Installs(args) => args.run(),
        Commands::Relaunch(args) => commands::install::relaunch(args),
        Commands::Uninstall(args) => commands::install::uninstall(args),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}

/// Library warnings go to stderr; `RUST_LOG` overrides.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
