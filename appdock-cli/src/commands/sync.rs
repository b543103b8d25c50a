//! `appdock sync`: pull the remote catalog.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use appdock_daemon::{is_running, request_sync};
use appdock_sync::{pipeline, HttpSource};

use super::Local;

/// Arguments for `appdock sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Only report whether a newer catalog exists.
    #[arg(long)]
    pub check: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let local = Local::open()?;
        let source = HttpSource::default();

        if self.check {
            let update = pipeline::check(local.store.as_ref(), &source, &local.settings)
                .context("update check failed")?;
            if update.can_update {
                println!(
                    "{} catalog {} is available",
                    "↑".yellow().bold(),
                    update.remote_version
                );
            } else {
                println!(
                    "{} catalog is up to date ({})",
                    "✓".green().bold(),
                    update.remote_version
                );
            }
            return Ok(());
        }

        let outcome = if is_running(&local.home) {
            request_sync(&local.home).context("daemon sync failed")?
        } else {
            let outcome =
                pipeline::sync_app_list(&local.home, local.store.as_ref(), &source, &local.settings)
                    .context("sync failed")?;
            serde_json::to_value(outcome).context("failed to serialize sync outcome")?
        };
        print_outcome(&outcome);
        Ok(())
    }
}

fn print_outcome(outcome: &Value) {
    let remote = outcome["remote_version"].as_str().unwrap_or("?");
    if outcome["outcome"] == "up_to_date" {
        println!("{} catalog is up to date ({remote})", "✓".green().bold());
        return;
    }

    let report = &outcome["report"];
    let count = |key: &str| report[key].as_u64().unwrap_or(0);
    println!(
        "{} synced catalog {remote}: {} apps added, {} updated; {} versions added, {} updated; {} tags",
        "✓".green().bold(),
        count("apps_added"),
        count("apps_updated"),
        count("versions_added"),
        count("versions_updated"),
        count("tags"),
    );
    for key in report["apps_skipped"].as_array().into_iter().flatten() {
        println!("  {} skipped app {}", "!".red(), key.as_str().unwrap_or("?"));
    }
    for pair in report["versions_skipped"].as_array().into_iter().flatten() {
        println!(
            "  {} skipped version {}@{}",
            "!".red(),
            pair[0].as_str().unwrap_or("?"),
            pair[1].as_str().unwrap_or("?")
        );
    }
}
