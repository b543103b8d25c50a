//! Install orchestrator: validate, render, persist, launch.
//!
//! ## `install` protocol
//!
//! 1. Provision the default network (idempotent).
//! 2. Reject a taken name.
//! 3. Resolve HTTP/HTTPS ports and reject ports held by installs or the host.
//! 4. Resolve version + application; check required apps, install limit and
//!    required parameters.
//! 5. Render the compose unit with fresh service/container names.
//! 6. Stage the version's companion data.
//! 7. Write the rendered compose file and `.env` into the stage.
//! 8. Create the record (`Installing`); promote the stage to its final path.
//! 9. Record `service` links to dependency installations.
//! 10. Schedule launch and post-install hooks in the background.
//!
//! Steps 2 and 3 are pre-checks only; the store re-checks name and port
//! uniqueness under its own lock in step 8.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use appdock_core::types::{PARAM_HTTPS_PORT, PARAM_HTTP_PORT};
use appdock_core::{
    CatalogStore, InstallLink, InstallStatus, InstallStore, Installation, Params, Settings,
    StoreError, VersionId,
};
use appdock_renderer::{is_project_name, ComposeDocument, ComposeRenderer, TemplateEngine};

use crate::data::{self, Staging};
use crate::docker::{ComposeRunner, DockerCli, NetworkProvisioner};
use crate::error::InstallError;
use crate::hooks::{self, PostInstall, ToolRebind};
use crate::launcher::{InstallTasks, Launcher};
use crate::ports::{self, PortProbe, TcpProbe};
use crate::schema::FormSchema;

/// Message recorded on installs found mid-launch after a restart.
pub const INTERRUPTED: &str = "interrupted";

/// Inbound install request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallRequest {
    pub version_id: VersionId,
    pub name: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub http_port: Option<u16>,
    #[serde(default)]
    pub https_port: Option<u16>,
}

/// External side effects the orchestrator depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub network: Arc<dyn NetworkProvisioner>,
    pub compose: Arc<dyn ComposeRunner>,
    pub probe: Arc<dyn PortProbe>,
}

impl Collaborators {
    /// The real host: `docker` CLI and TCP bind probing.
    pub fn host() -> Self {
        let docker = Arc::new(DockerCli::default());
        Self {
            network: docker.clone(),
            compose: docker,
            probe: Arc::new(TcpProbe),
        }
    }
}

pub struct Orchestrator {
    home: PathBuf,
    settings: Settings,
    catalog: Arc<dyn CatalogStore>,
    installs: Arc<dyn InstallStore>,
    network: Arc<dyn NetworkProvisioner>,
    compose: Arc<dyn ComposeRunner>,
    probe: Arc<dyn PortProbe>,
    renderer: ComposeRenderer,
    engine: Arc<TemplateEngine>,
    launcher: Launcher,
    hooks: Vec<Arc<dyn PostInstall>>,
}

/// Install names double as directory names and compose project names, so
/// they are restricted to the compose project alphabet.
fn valid_name(name: &str) -> bool {
    name.len() <= 64 && is_project_name(name)
}

impl Orchestrator {
    pub fn new(
        home: &Path,
        settings: Settings,
        catalog: Arc<dyn CatalogStore>,
        installs: Arc<dyn InstallStore>,
        collaborators: Collaborators,
        handle: Handle,
    ) -> Result<Self, InstallError> {
        let engine = Arc::new(TemplateEngine::new(None)?);
        let launcher = Launcher::new(
            handle,
            Arc::clone(&installs),
            Arc::clone(&collaborators.compose),
            settings.launch_timeout(),
        );
        let rebind: Arc<dyn PostInstall> = Arc::new(ToolRebind::new(
            Arc::clone(&catalog),
            Arc::clone(&installs),
            Arc::clone(&engine),
        ));
        Ok(Self {
            home: home.to_path_buf(),
            renderer: ComposeRenderer::new(settings.container_prefix.clone()),
            settings,
            catalog,
            installs,
            network: collaborators.network,
            compose: collaborators.compose,
            probe: collaborators.probe,
            engine,
            launcher,
            hooks: vec![rebind],
        })
    }

    pub fn with_launch_timeout(mut self, timeout: Duration) -> Self {
        self.launcher = self.launcher.with_timeout(timeout);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn PostInstall>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn installs(&self) -> &Arc<dyn InstallStore> {
        &self.installs
    }

    /// Install a catalog version. Returns the `Installing` record and the
    /// handles of the background tasks; dropping them detaches the tasks.
    pub fn install(
        &self,
        req: InstallRequest,
    ) -> Result<(Installation, InstallTasks), InstallError> {
        // 1
        let network = &self.settings.default_network;
        self.network
            .ensure_network(network)
            .map_err(|e| InstallError::NetworkSetup {
                network: network.clone(),
                cause: e.to_string(),
            })?;

        // 2
        if !valid_name(&req.name) {
            return Err(InstallError::InvalidParam {
                key: "name".to_string(),
                reason: "use 1-64 lowercase letters, digits, '-' or '_', starting with a letter or digit"
                    .to_string(),
            });
        }
        if self.installs.install_by_name(&req.name)?.is_some() {
            return Err(InstallError::NameConflict(req.name));
        }

        // 3
        let mut params = req.params;
        let mut http_port = ports::resolve_port(PARAM_HTTP_PORT, req.http_port, &mut params)?;
        let mut https_port = ports::resolve_port(PARAM_HTTPS_PORT, req.https_port, &mut params)?;
        let existing = self.installs.installs()?;
        let requested: Vec<u16> = http_port.into_iter().chain(https_port).collect();
        ports::check_ports(&requested, &existing, self.probe.as_ref())?;

        // 4
        let version = self.catalog.version(req.version_id)?;
        let app_id = version
            .app_id
            .ok_or_else(|| StoreError::not_found("version owner", req.version_id))?;
        let app = self.catalog.app(app_id)?;
        for key in &app.required {
            if !existing.iter().any(|i| &i.app_key == key) {
                return Err(InstallError::RequirementUnmet(format!(
                    "'{}' requires an installation of '{key}'",
                    app.key
                )));
            }
        }
        let installed = existing.iter().filter(|i| i.app_id == app_id).count();
        if app.limit_reached(installed) {
            return Err(InstallError::LimitExceeded {
                app: app.key.clone(),
                limit: app.limit,
            });
        }
        let schema = FormSchema::parse(&version.params)?;
        schema.apply_defaults(&mut params);
        schema.check_required(&params)?;
        // Schema defaults may supply ports the request left out.
        let mut defaulted = Vec::new();
        if http_port.is_none() {
            http_port = ports::resolve_port(PARAM_HTTP_PORT, None, &mut params)?;
            defaulted.extend(http_port);
        }
        if https_port.is_none() {
            https_port = ports::resolve_port(PARAM_HTTPS_PORT, None, &mut params)?;
            defaulted.extend(https_port);
        }
        if !defaulted.is_empty() {
            let requested: Vec<u16> = http_port.into_iter().chain(https_port).collect();
            ports::check_ports(&requested, &existing, self.probe.as_ref())?;
        }

        // 5
        let taken = taken_names(&existing);
        let unit = self
            .renderer
            .render(&version.docker_compose, &req.name, &mut params, &taken)?;

        // 6, 7
        let staging = Staging::create(&self.home, &app.key, &version.version, &req.name)?;
        let env = self.engine.render_env(&req.name, &params)?;
        staging.write_unit(&unit.compose, &env)?;

        // 8
        let now = Utc::now();
        let mut install = Installation {
            id: None,
            name: req.name,
            app_id,
            app_key: app.key.clone(),
            version_id: req.version_id,
            version: version.version.clone(),
            params,
            service_name: unit.primary_service.clone(),
            container_name: unit.container_name.clone(),
            http_port,
            https_port,
            status: InstallStatus::Installing,
            message: None,
            docker_compose: unit.compose,
            compose_path: staging.compose_path(),
            created_at: now,
            updated_at: now,
        };
        self.installs.create_install(&mut install)?;
        if let Err(e) = staging.promote() {
            self.fail(&install, &e);
            return Err(e);
        }
        tracing::info!(
            install = %install.name,
            app = %install.app_key,
            version = %install.version,
            service = %install.service_name,
            "installation recorded"
        );

        // 9
        if let Err(e) = self.link(&install, &schema, &existing) {
            self.fail(&install, &e);
            return Err(e);
        }

        // 10
        let tasks = InstallTasks {
            launch: self.launcher.launch(&install),
            post_install: self.spawn_hooks(&install),
        };
        Ok((install, tasks))
    }

    fn link(
        &self,
        install: &Installation,
        schema: &FormSchema,
        existing: &[Installation],
    ) -> Result<(), InstallError> {
        let Some(install_id) = install.id else {
            return Ok(());
        };
        for field in schema.service_fields() {
            let Some(service) = install.params.get(&field.env_key).and_then(|v| v.as_str()) else {
                continue;
            };
            if service.is_empty() {
                continue;
            }
            let target = existing
                .iter()
                .find(|i| {
                    i.service_name == service && (field.key.is_empty() || i.app_key == field.key)
                })
                .ok_or_else(|| {
                    InstallError::RequirementUnmet(format!(
                        "{}: no installation provides service '{service}'",
                        field.env_key
                    ))
                })?;
            let target_id = target
                .id
                .ok_or_else(|| StoreError::not_found("installation", &target.name))?;
            self.installs.insert_link(&InstallLink {
                install_id,
                target_id,
                app_key: target.app_key.clone(),
                env_key: field.env_key.clone(),
            })?;
        }
        Ok(())
    }

    fn spawn_hooks(&self, install: &Installation) -> JoinHandle<()> {
        let hooks = self.hooks.clone();
        let install = install.clone();
        let handle = self.launcher.handle().clone();
        handle.spawn(async move {
            let joined =
                tokio::task::spawn_blocking(move || hooks::run_all(&hooks, &install)).await;
            if let Err(e) = joined {
                tracing::error!("post-install hooks aborted: {e}");
            }
        })
    }

    /// Mark a recorded install as failed after a synchronous step broke.
    fn fail(&self, install: &Installation, cause: &InstallError) {
        let Some(id) = install.id else { return };
        if let Err(e) = self
            .installs
            .set_status(id, InstallStatus::Error, Some(cause.to_string()))
        {
            tracing::error!(install = %install.name, "failed to mark install as error: {e}");
        }
    }

    fn by_name(&self, name: &str) -> Result<Installation, InstallError> {
        self.installs
            .install_by_name(name)?
            .ok_or_else(|| StoreError::not_found("installation", name).into())
    }

    /// Re-run the launch task for an installation in `Error`.
    pub fn relaunch(
        &self,
        name: &str,
    ) -> Result<(Installation, JoinHandle<InstallStatus>), InstallError> {
        let current = self.by_name(name)?;
        if current.status != InstallStatus::Error {
            return Err(InstallError::InvalidState {
                name: current.name,
                status: current.status,
                action: "relaunch",
            });
        }
        let id = current
            .id
            .ok_or_else(|| StoreError::not_found("installation", name))?;
        let install = self.installs.set_status(id, InstallStatus::Installing, None)?;
        tracing::info!(install = %install.name, "relaunching");
        let launch = self.launcher.launch(&install);
        Ok((install, launch))
    }

    /// Tear an installation down: `Removing`, then in the background
    /// `compose down`, delete its directory and its record.
    pub fn uninstall(
        &self,
        name: &str,
    ) -> Result<(Installation, JoinHandle<Result<(), InstallError>>), InstallError> {
        let current = self.by_name(name)?;
        if !current.status.can_transition_to(InstallStatus::Removing) {
            return Err(InstallError::InvalidState {
                name: current.name,
                status: current.status,
                action: "uninstall",
            });
        }
        let id = current
            .id
            .ok_or_else(|| StoreError::not_found("installation", name))?;
        let install = self.installs.set_status(id, InstallStatus::Removing, None)?;

        let installs = Arc::clone(&self.installs);
        let compose = Arc::clone(&self.compose);
        let record = install.clone();
        let task = self.launcher.handle().spawn(async move {
            if let Err(e) = compose.down(&record.compose_path).await {
                tracing::warn!(install = %record.name, "compose down failed: {e}");
            }
            if let Some(dir) = record.install_dir() {
                data::remove_install_dir(dir)?;
            }
            installs.delete_install(id)?;
            tracing::info!(install = %record.name, "uninstalled");
            Ok::<(), InstallError>(())
        });
        Ok((install, task))
    }
}

/// Mark every `Installing` record as `Error("interrupted")`.
///
/// Called once at startup: no launch task survives a restart, so those
/// records would otherwise stay `Installing` forever.
pub fn mark_interrupted(installs: &dyn InstallStore) -> Result<usize, StoreError> {
    let mut marked = 0;
    for install in installs.installs()? {
        if install.status != InstallStatus::Installing {
            continue;
        }
        if let Some(id) = install.id {
            installs.set_status(id, InstallStatus::Error, Some(INTERRUPTED.to_string()))?;
            tracing::warn!(install = %install.name, "launch was interrupted; marked as error");
            marked += 1;
        }
    }
    Ok(marked)
}

/// Service and container names in use by any installation.
fn taken_names(installs: &[Installation]) -> HashSet<String> {
    let mut taken = HashSet::new();
    for install in installs {
        taken.insert(install.service_name.clone());
        taken.insert(install.container_name.clone());
        if let Ok(doc) = ComposeDocument::parse(&install.docker_compose) {
            taken.extend(doc.service_names());
        }
    }
    taken
}
