//! Background launch of compose units.
//!
//! Tasks run on a captured runtime handle so synchronous callers (CLI, worker
//! threads) can schedule them too. Outcomes land on the installation record;
//! the returned handles exist for callers that want to wait.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use appdock_core::{InstallId, InstallStatus, InstallStore, Installation};

use crate::docker::ComposeRunner;

/// Join handles for the two background tasks scheduled by an install.
///
/// Dropping this detaches both tasks.
#[derive(Debug)]
pub struct InstallTasks {
    pub launch: JoinHandle<InstallStatus>,
    pub post_install: JoinHandle<()>,
}

impl InstallTasks {
    /// Wait for both tasks; returns the launch outcome.
    pub async fn wait(self) -> InstallStatus {
        let (launch, post) = tokio::join!(self.launch, self.post_install);
        if let Err(e) = post {
            tracing::error!("post-install task failed: {e}");
        }
        launch.unwrap_or_else(|e| {
            tracing::error!("launch task failed: {e}");
            InstallStatus::Error
        })
    }
}

#[derive(Clone)]
pub struct Launcher {
    handle: Handle,
    installs: Arc<dyn InstallStore>,
    compose: Arc<dyn ComposeRunner>,
    timeout: Duration,
}

impl Launcher {
    pub fn new(
        handle: Handle,
        installs: Arc<dyn InstallStore>,
        compose: Arc<dyn ComposeRunner>,
        timeout: Duration,
    ) -> Self {
        Self {
            handle,
            installs,
            compose,
            timeout,
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bring `install` up in the background and record the outcome.
    pub fn launch(&self, install: &Installation) -> JoinHandle<InstallStatus> {
        let installs = Arc::clone(&self.installs);
        let compose = Arc::clone(&self.compose);
        let timeout = self.timeout;
        let id = install.id;
        let name = install.name.clone();
        let compose_path = install.compose_path.clone();

        self.handle.spawn(async move {
            let (status, message) = run_up(compose, compose_path, timeout).await;
            match status {
                InstallStatus::Running => tracing::info!(install = %name, "install is running"),
                _ => tracing::error!(
                    install = %name,
                    error = message.as_deref().unwrap_or(""),
                    "launch failed"
                ),
            }
            record(installs, id, &name, status, message).await;
            status
        })
    }
}

/// On timeout the `up` future is dropped, which stops the compose command.
async fn run_up(
    compose: Arc<dyn ComposeRunner>,
    compose_path: PathBuf,
    timeout: Duration,
) -> (InstallStatus, Option<String>) {
    match tokio::time::timeout(timeout, compose.up(&compose_path)).await {
        Ok(Ok(())) => (InstallStatus::Running, None),
        Ok(Err(e)) => (InstallStatus::Error, Some(e.to_string())),
        Err(_) => (
            InstallStatus::Error,
            Some(format!("launch timed out after {}s", timeout.as_secs_f64())),
        ),
    }
}

async fn record(
    installs: Arc<dyn InstallStore>,
    id: Option<InstallId>,
    name: &str,
    status: InstallStatus,
    message: Option<String>,
) {
    let Some(id) = id else {
        tracing::error!(install = %name, "cannot record launch outcome: record has no id");
        return;
    };
    let result =
        tokio::task::spawn_blocking(move || installs.set_status(id, status, message)).await;
    match result {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::error!(install = %name, "failed to record launch outcome: {e}"),
        Err(e) => tracing::error!(install = %name, "failed to record launch outcome: {e}"),
    }
}
