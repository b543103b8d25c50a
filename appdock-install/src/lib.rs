//! # appdock-install
//!
//! Turns a catalog version into a running, uniquely named installation.
//!
//! [`Orchestrator::install`] validates the request, renders the compose unit,
//! records the installation and schedules its launch; [`Launcher`] owns the
//! background `compose up`, and [`hooks`] run post-install bookkeeping.
//! Docker and host-port access sit behind [`docker`] and [`ports`] traits.

pub mod data;
pub mod docker;
pub mod error;
pub mod hooks;
pub mod launcher;
pub mod orchestrator;
pub mod ports;
pub mod schema;

pub use docker::{CommandError, ComposeRunner, DockerCli, NetworkProvisioner};
pub use error::InstallError;
pub use hooks::{PostInstall, ToolRebind};
pub use launcher::{InstallTasks, Launcher};
pub use orchestrator::{mark_interrupted, Collaborators, InstallRequest, Orchestrator};
pub use ports::{PortProbe, TcpProbe};
pub use schema::{FormField, FormSchema};
