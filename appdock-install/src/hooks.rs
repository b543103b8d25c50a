//! Post-install bookkeeping hooks.

use std::collections::HashSet;
use std::sync::Arc;

use appdock_core::file_store::write_atomic;
use appdock_core::paths::ENV_FILE;
use appdock_core::{AppType, CatalogStore, InstallStore, Installation};
use appdock_renderer::TemplateEngine;

use crate::error::InstallError;

/// Bookkeeping that runs in the background after an install is recorded.
pub trait PostInstall: Send + Sync {
    fn name(&self) -> &'static str;
    fn after_install(&self, install: &Installation) -> Result<(), InstallError>;
}

/// Rebinds tool installations to a freshly installed runtime.
///
/// When a runtime (say `mysql`) is reinstalled, tools that were linked to a
/// since-removed installation of it are pointed at the new one: the link is
/// updated and the tool's parameter and `.env` carry the new service name.
pub struct ToolRebind {
    catalog: Arc<dyn CatalogStore>,
    installs: Arc<dyn InstallStore>,
    engine: Arc<TemplateEngine>,
}

impl ToolRebind {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        installs: Arc<dyn InstallStore>,
        engine: Arc<TemplateEngine>,
    ) -> Self {
        Self {
            catalog,
            installs,
            engine,
        }
    }

    fn rewrite_env(&self, tool: &Installation) -> Result<(), InstallError> {
        let Some(dir) = tool.install_dir() else {
            return Ok(());
        };
        if !dir.is_dir() {
            return Ok(());
        }
        let env = self.engine.render_env(&tool.name, &tool.params)?;
        write_atomic(&dir.join(ENV_FILE), env.as_bytes())?;
        Ok(())
    }
}

impl PostInstall for ToolRebind {
    fn name(&self) -> &'static str {
        "tool-rebind"
    }

    fn after_install(&self, install: &Installation) -> Result<(), InstallError> {
        let Some(new_id) = install.id else {
            return Ok(());
        };
        if self.catalog.app(install.app_id)?.app_type != AppType::Runtime {
            return Ok(());
        }

        let all = self.installs.installs()?;
        let live: HashSet<_> = all.iter().filter_map(|i| i.id).collect();
        for link in self.installs.links()? {
            if link.app_key != install.app_key || live.contains(&link.target_id) {
                continue;
            }
            let Some(mut tool) = all.iter().find(|i| i.id == Some(link.install_id)).cloned()
            else {
                continue;
            };
            if self.catalog.app(tool.app_id)?.app_type != AppType::Tool {
                continue;
            }

            let mut rebound = link.clone();
            rebound.target_id = new_id;
            self.installs.update_link(&rebound)?;
            tool.params.insert(
                link.env_key.clone(),
                serde_json::Value::String(install.service_name.clone()),
            );
            self.installs.update_install(&tool)?;
            self.rewrite_env(&tool)?;
            tracing::info!(
                tool = %tool.name,
                runtime = %install.name,
                env = %link.env_key,
                "rebound tool to new runtime installation"
            );
        }
        Ok(())
    }
}

/// Run every hook, logging failures; one failing hook does not stop the rest.
pub fn run_all(hooks: &[Arc<dyn PostInstall>], install: &Installation) {
    for hook in hooks {
        if let Err(e) = hook.after_install(install) {
            tracing::error!(hook = hook.name(), install = %install.name, "post-install hook failed: {e}");
        }
    }
}
