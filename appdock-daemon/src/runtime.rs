use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use appdock_core::paths::{logs_dir, socket_path, tmp_dir};
use appdock_core::{settings, CatalogStore, FileStore, InstallStore, Settings};
use appdock_install::{mark_interrupted, Collaborators, Orchestrator};
use appdock_sync::{sync_app_list, HttpSource, ManifestSource, SyncOutcome};

use crate::error::{io_err, DaemonError};
use crate::protocol::{DaemonRequest, DaemonResponse, InstallSpec};

/// Everything the daemon talks to; [`Services::host`] wires the real ones.
pub struct Services {
    pub home: PathBuf,
    pub settings: Settings,
    pub store: Arc<FileStore>,
    pub source: Arc<dyn ManifestSource>,
    pub collaborators: Collaborators,
}

impl Services {
    pub fn host(home: &Path) -> Result<Self, DaemonError> {
        Ok(Self {
            home: home.to_path_buf(),
            settings: settings::load_at(home)?,
            store: Arc::new(FileStore::open_at(home)?),
            source: Arc::new(HttpSource::default()),
            collaborators: Collaborators::host(),
        })
    }
}

struct SyncJob {
    source: &'static str,
    respond_to: oneshot::Sender<Result<SyncOutcome, String>>,
}

/// Most recent sync attempt, as reported by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct LastSync {
    pub at_unix: u64,
    pub source: String,
    pub duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SyncOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct DaemonState {
    home: PathBuf,
    store: Arc<FileStore>,
    orchestrator: Orchestrator,
    started_at_unix: u64,
    last_sync: RwLock<Option<LastSync>>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon against the real host.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    run_with(Services::host(&home)?).await
}

/// Run the daemon with the given services until `stop` or ctrl-c.
pub async fn run_with(services: Services) -> Result<(), DaemonError> {
    let Services {
        home,
        settings,
        store,
        source,
        collaborators,
    } = services;
    ensure_runtime_dirs(&home)?;

    let interrupted = mark_interrupted(store.as_ref())?;
    if interrupted > 0 {
        tracing::warn!(count = interrupted, "marked interrupted installs as error");
    }

    let orchestrator = Orchestrator::new(
        &home,
        settings.clone(),
        store.clone(),
        store.clone(),
        collaborators,
        Handle::current(),
    )?;
    let state = Arc::new(DaemonState {
        home: home.clone(),
        store: store.clone(),
        orchestrator,
        started_at_unix: unix_seconds_now(),
        last_sync: RwLock::new(None),
    });
    let sync_interval = settings.sync_interval();

    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let state = state.clone();
        tokio::spawn(async move {
            let result = sync_processor_task(state, settings, source, sync_rx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result = scheduler_task(sync_interval, sync_tx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let state = state.clone();
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(state, sync_tx, shutdown.clone(), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    tracing::info!(home = %home.display(), "daemon started");
    let (processor_result, scheduler_result, socket_result, signal_result) = tokio::join!(
        processor_handle,
        scheduler_handle,
        socket_handle,
        signal_handle
    );

    handle_join("sync_processor", processor_result)?;
    handle_join("sync_scheduler", scheduler_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// The only place catalog syncs run, one job at a time.
async fn sync_processor_task(
    state: Arc<DaemonState>,
    settings: Settings,
    source: Arc<dyn ManifestSource>,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let settings = Arc::new(settings);
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = sync_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();

                let home = state.home.clone();
                let store = state.store.clone();
                let source = source.clone();
                let settings = settings.clone();
                let sync_result = tokio::task::spawn_blocking(move || {
                    sync_app_list(&home, store.as_ref(), source.as_ref(), &settings)
                })
                .await
                .map_err(|err| DaemonError::Protocol(format!("sync task join error: {err}")))?;

                let outcome = sync_result.map_err(|err| err.to_string());
                match &outcome {
                    Ok(result) => tracing::info!(source = job.source, outcome = ?result, "sync completed"),
                    Err(err) => tracing::error!(source = job.source, error = %err, "sync failed"),
                }
                *state.last_sync.write().await = Some(LastSync {
                    at_unix: unix_seconds_now(),
                    source: job.source.to_string(),
                    duration_ms: started.elapsed().as_millis(),
                    outcome: outcome.as_ref().ok().cloned(),
                    error: outcome.as_ref().err().cloned(),
                });

                let _ = job.respond_to.send(outcome);
            }
        }
    }

    Ok(())
}

/// Enqueue a sync every `every`; idles until shutdown when periodic sync is off.
async fn scheduler_task(
    every: Option<Duration>,
    sync_tx: mpsc::Sender<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let Some(every) = every else {
        tracing::info!("periodic catalog sync disabled");
        let _ = shutdown_rx.recv().await;
        return Ok(());
    };

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                // Failures are recorded by the processor; keep scheduling.
                if let Err(err) = enqueue_sync(&sync_tx, "schedule").await {
                    tracing::warn!(error = %err, "scheduled sync did not complete");
                }
            }
        }
    }
    Ok(())
}

async fn enqueue_sync(
    sync_tx: &mpsc::Sender<SyncJob>,
    source: &'static str,
) -> Result<SyncOutcome, DaemonError> {
    let (tx, rx) = oneshot::channel();
    sync_tx
        .send(SyncJob {
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync response"))?;
    outcome.map_err(DaemonError::Protocol)
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    state: Arc<DaemonState>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&state.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = state.clone();
                let sync_tx = sync_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, state, sync_tx, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    state: Arc<DaemonState>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let cmd = request.cmd.clone();
        let response = match cmd.as_str() {
            "status" => DaemonResponse::ok(build_status_payload(state.clone()).await),
            "sync" => respond(enqueue_sync(&sync_tx, "socket").await.map(|o| json!(o))),
            "install" => respond(install(state.clone(), request.install).await),
            "relaunch" => respond(relaunch(state.clone(), request.name).await),
            "uninstall" => respond(uninstall(state.clone(), request.name).await),
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if cmd == "stop" {
            break;
        }
    }

    Ok(())
}

fn respond(result: Result<Value, DaemonError>) -> DaemonResponse {
    match result {
        Ok(data) => DaemonResponse::ok(data),
        Err(err) => DaemonResponse::error(err.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Install commands
// ---------------------------------------------------------------------------

// Install, relaunch and uninstall return once the record changed; their
// background tasks stay detached on the runtime.

async fn install(state: Arc<DaemonState>, spec: Option<InstallSpec>) -> Result<Value, DaemonError> {
    let spec = spec.ok_or_else(|| DaemonError::Protocol("install needs an `install` object".into()))?;
    blocking(move || {
        let request = spec.resolve(state.store.as_ref())?;
        let (install, _tasks) = state.orchestrator.install(request)?;
        Ok(serde_json::to_value(install)?)
    })
    .await
}

async fn relaunch(state: Arc<DaemonState>, name: Option<String>) -> Result<Value, DaemonError> {
    let name = required_name("relaunch", name)?;
    blocking(move || {
        let (install, _launch) = state.orchestrator.relaunch(&name)?;
        Ok(serde_json::to_value(install)?)
    })
    .await
}

async fn uninstall(state: Arc<DaemonState>, name: Option<String>) -> Result<Value, DaemonError> {
    let name = required_name("uninstall", name)?;
    blocking(move || {
        let (install, _removal) = state.orchestrator.uninstall(&name)?;
        Ok(serde_json::to_value(install)?)
    })
    .await
}

fn required_name(cmd: &str, name: Option<String>) -> Result<String, DaemonError> {
    name.filter(|n| !n.is_empty())
        .ok_or_else(|| DaemonError::Protocol(format!("{cmd} needs a `name`")))
}

async fn blocking<F>(work: F) -> Result<Value, DaemonError>
where
    F: FnOnce() -> Result<Value, DaemonError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| DaemonError::Protocol(format!("worker join error: {err}")))?
}

async fn build_status_payload(state: Arc<DaemonState>) -> Value {
    let last_sync = state.last_sync.read().await.clone();

    let store = state.store.clone();
    let snapshot = tokio::task::spawn_blocking(move || {
        let catalog_version = store.catalog_version()?;
        let mut by_status = BTreeMap::<String, usize>::new();
        for install in store.installs()? {
            *by_status.entry(install.status.to_string()).or_default() += 1;
        }
        Ok::<_, DaemonError>((catalog_version, by_status))
    })
    .await;

    let (catalog_version, installs) = match snapshot {
        Ok(Ok(snapshot)) => snapshot,
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "status could not read the store");
            (None, BTreeMap::new())
        }
        Err(err) => {
            tracing::warn!(error = %err, "status snapshot task failed");
            (None, BTreeMap::new())
        }
    };

    json!({
        "running": true,
        "pid": std::process::id(),
        "started_at_unix": state.started_at_unix,
        "catalog_version": catalog_version,
        "last_sync": last_sync,
        "installs": installs,
        "socket": socket_path(&state.home).display().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Plumbing
// ---------------------------------------------------------------------------

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [logs_dir(home), tmp_dir(home)] {
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// `fmt` subscriber at `info`; `RUST_LOG` overrides.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use appdock_install::docker::CommandError;
    use appdock_install::{ComposeRunner, NetworkProvisioner, PortProbe};
    use appdock_sync::updater::RemoteDescriptor;
    use appdock_sync::SyncError;
    use tempfile::TempDir;

    use crate::protocol::send_request;

    struct Unreachable;

    impl ManifestSource for Unreachable {
        fn fetch_descriptor(&self, url: &str) -> Result<RemoteDescriptor, SyncError> {
            Err(SyncError::Transport {
                url: url.to_string(),
                message: "connection refused".to_string(),
            })
        }

        fn download(&self, url: &str, _dest: &Path) -> Result<u64, SyncError> {
            self.fetch_descriptor(url).map(|_| 0)
        }
    }

    struct NoDocker;

    impl NetworkProvisioner for NoDocker {
        fn ensure_network(&self, _name: &str) -> Result<(), CommandError> {
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl ComposeRunner for NoDocker {
        async fn up(&self, _compose_file: &Path) -> Result<(), CommandError> {
            Ok(())
        }

        async fn down(&self, _compose_file: &Path) -> Result<(), CommandError> {
            Ok(())
        }
    }

    impl PortProbe for NoDocker {
        fn in_use(&self, _port: u16) -> bool {
            false
        }
    }

    fn services(home: &Path) -> Services {
        let docker = Arc::new(NoDocker);
        Services {
            home: home.to_path_buf(),
            settings: Settings {
                sync_interval_secs: 0,
                ..Settings::default()
            },
            store: Arc::new(FileStore::open_at(home).expect("store")),
            source: Arc::new(Unreachable),
            collaborators: Collaborators {
                network: docker.clone(),
                compose: docker.clone(),
                probe: docker,
            },
        }
    }

    async fn call(home: &Path, request: DaemonRequest) -> DaemonResponse {
        let home = home.to_path_buf();
        tokio::task::spawn_blocking(move || send_request(&home, &request))
            .await
            .expect("join")
            .expect("response")
    }

    async fn wait_for_socket(home: &Path) {
        let socket = socket_path(home);
        for _ in 0..200 {
            if socket.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("daemon socket never appeared");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn socket_serves_commands_until_stop() {
        let home = TempDir::new().expect("home");
        let daemon = tokio::spawn(run_with(services(home.path())));
        wait_for_socket(home.path()).await;

        let status = call(home.path(), DaemonRequest::new("status")).await;
        assert!(status.ok);
        let data = status.data.expect("status data");
        assert_eq!(data["running"], json!(true));
        assert_eq!(data["catalog_version"], Value::Null);

        let unknown = call(home.path(), DaemonRequest::new("bogus")).await;
        assert_eq!(unknown.error.as_deref(), Some("unknown command 'bogus'"));

        let sync = call(home.path(), DaemonRequest::new("sync")).await;
        assert!(!sync.ok);
        assert!(sync.error.expect("sync error").contains("connection refused"));
        let status = call(home.path(), DaemonRequest::new("status")).await;
        assert_eq!(status.data.expect("data")["last_sync"]["source"], json!("socket"));

        let install = call(
            home.path(),
            DaemonRequest {
                install: Some(InstallSpec {
                    app: "ghost".into(),
                    version: "1.0".into(),
                    name: "g".into(),
                    params: Default::default(),
                    http_port: None,
                    https_port: None,
                }),
                ..DaemonRequest::new("install")
            },
        )
        .await;
        assert!(install.error.expect("install error").contains("not found"));

        let relaunch = call(home.path(), DaemonRequest::new("relaunch")).await;
        assert_eq!(relaunch.error.as_deref(), Some("daemon protocol error: relaunch needs a `name`"));

        let stop = call(home.path(), DaemonRequest::new("stop")).await;
        assert!(stop.ok);
        tokio::time::timeout(Duration::from_secs(5), daemon)
            .await
            .expect("daemon exits after stop")
            .expect("join")
            .expect("clean shutdown");
        assert!(!socket_path(home.path()).exists());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn scheduler_enqueues_on_each_interval() {
        let (sync_tx, mut sync_rx) = mpsc::channel::<SyncJob>(4);
        let (shutdown_tx, _) = broadcast::channel::<()>(4);
        let scheduler = tokio::spawn(scheduler_task(
            Some(Duration::from_secs(3600)),
            sync_tx,
            shutdown_tx.subscribe(),
        ));

        let started = Instant::now();
        for _ in 0..2 {
            let job = sync_rx.recv().await.expect("scheduled job");
            assert_eq!(job.source, "schedule");
            let _ = job.respond_to.send(Err("offline".to_string()));
        }
        assert!(started.elapsed() >= Duration::from_secs(7200));

        let _ = shutdown_tx.send(());
        scheduler.await.expect("join").expect("scheduler result");
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn disabled_scheduler_waits_for_shutdown() {
        let (sync_tx, mut sync_rx) = mpsc::channel::<SyncJob>(4);
        let (shutdown_tx, _) = broadcast::channel::<()>(4);
        let scheduler = tokio::spawn(scheduler_task(None, sync_tx, shutdown_tx.subscribe()));

        tokio::time::sleep(Duration::from_secs(86_400 * 7)).await;
        assert!(sync_rx.try_recv().is_err());
        let _ = shutdown_tx.send(());
        tokio_test::assert_ok!(scheduler.await.expect("join"));
    }
}
