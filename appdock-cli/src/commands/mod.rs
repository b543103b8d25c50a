pub mod catalog;
pub mod daemon;
pub mod install;
pub mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use appdock_core::{settings, FileStore, Settings};

/// Settings and store of the current user, opened in-process.
pub(crate) struct Local {
    pub home: PathBuf,
    pub settings: Settings,
    pub store: Arc<FileStore>,
}

impl Local {
    pub fn open() -> Result<Self> {
        let home = home()?;
        let settings = settings::load_at(&home).context("failed to load settings")?;
        let store = FileStore::open_at(&home).context("failed to open the local store")?;
        Ok(Self {
            home,
            settings,
            store: Arc::new(store),
        })
    }
}

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize JSON output")?
    );
    Ok(())
}
