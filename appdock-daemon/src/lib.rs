//! Long-running appdock service: serialized catalog sync, periodic sync, and
//! a Unix-socket JSON protocol for install lifecycle commands.

mod error;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    is_running, request_install, request_relaunch, request_status, request_stop, request_sync,
    request_uninstall, send_request, DaemonRequest, DaemonResponse, InstallSpec,
};
pub use runtime::{init_tracing, run, run_with, start_blocking, LastSync, Services};
