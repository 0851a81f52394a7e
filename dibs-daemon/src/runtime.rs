use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dibs_bus::{EventBus, ModuleEvents, RedisBus};
use dibs_core::config::read_module_name;
use dibs_core::{ClientConfig, HostConfig, Module, ModuleName};
use dibs_sync::{GitVcs, Vcs};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::controller::PipelineController;
use crate::error::{io_err, join_err, DaemonError};
use crate::githost;
use crate::paths;
use crate::provisioner::DirectoryManager;
use crate::puller::ModulePuller;
use crate::watcher::FolderWatcher;

/// Start the client runtime and block the current thread until it exits.
pub fn start_client_blocking(config: ClientConfig, json_logs: bool) -> Result<(), DaemonError> {
    init_tracing(json_logs);
    build_runtime()?
        .block_on(run_client(config))
        .inspect_err(|err| tracing::error!(error = %err, "client stopped"))
}

/// Start the host runtime and block the current thread until it exits.
pub fn start_host_blocking(config: HostConfig, json_logs: bool) -> Result<(), DaemonError> {
    init_tracing(json_logs);
    build_runtime()?
        .block_on(run_host(config))
        .inspect_err(|err| tracing::error!(error = %err, "host stopped"))
}

fn build_runtime() -> Result<tokio::runtime::Runtime, DaemonError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Resolve the module, connect to the bus and run the pipeline until a
/// termination signal arrives.
pub async fn run_client(config: ClientConfig) -> Result<(), DaemonError> {
    let module = read_module_name(&config.module_file)?;
    let bus = RedisBus::connect(&config.bus.normalized_url()).await?;

    let shutdown = CancellationToken::new();
    let signals = spawn_signal_listener(shutdown.clone());
    let result = run_client_with(config, module, Arc::new(bus), shutdown.clone()).await;
    shutdown.cancel();
    handle_join("signal", signals.await)?;
    result
}

/// Client lifecycle against an already-connected bus: register, run until
/// `shutdown`, then kill the start process and unregister. Modules in
/// `config.pull` are mirrored alongside.
pub async fn run_client_with(
    config: ClientConfig,
    name: ModuleName,
    bus: Arc<dyn EventBus>,
    shutdown: CancellationToken,
) -> Result<(), DaemonError> {
    let events = ModuleEvents::new(bus, config.bus.prefix.clone());
    let module = Module::from_config(name, &config);
    let vcs: Arc<dyn Vcs> = Arc::new(GitVcs);
    let mut controller = PipelineController::new(module, config.git.clone(), events.clone(), Arc::clone(&vcs))?
        .with_step_timeout(config.step_timeout_secs.map(Duration::from_secs))
        .with_cancellation(shutdown.clone());

    let puller = if config.pull.is_empty() {
        None
    } else {
        fs::create_dir_all(&config.pull_dir).map_err(|e| io_err(&config.pull_dir, e))?;
        controller = controller.exclude_dir(&config.pull_dir);
        let puller = ModulePuller::new(config.pull.clone(), &config.pull_dir, config.git.clone(), vcs);
        Some(puller.start(&events, shutdown.clone()).await?)
    };

    let mut watcher = FolderWatcher::watch(
        &config.watch_dir,
        controller.filter().clone(),
        Duration::from_millis(config.debounce_ms),
    )?;

    if let Err(err) = controller.register().await {
        shutdown.cancel();
        return Err(err);
    }
    controller.run(&mut watcher).await;
    watcher.stop();

    if let Err(err) = controller.unregister().await {
        tracing::warn!(module = %controller.module().name, error = %err, "unregistration not delivered");
    }
    if let Some(puller) = puller {
        shutdown.cancel();
        puller.await.map_err(|e| join_err("pull", e))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// Connect to the bus, bind the git host and serve until a termination
/// signal arrives.
pub async fn run_host(config: HostConfig) -> Result<(), DaemonError> {
    let bus = RedisBus::connect(&config.bus.normalized_url()).await?;
    let listener = githost::bind(&config.http.listen).await?;

    let shutdown = CancellationToken::new();
    let signals = spawn_signal_listener(shutdown.clone());
    let result = run_host_with(config, Arc::new(bus), listener, shutdown.clone()).await;
    shutdown.cancel();
    handle_join("signal", signals.await)?;
    result
}

/// Host lifecycle against an already-connected bus and bound listener.
///
/// Returns after `shutdown` is cancelled, every in-flight provisioning task
/// has finished and the HTTP server has stopped.
pub async fn run_host_with(
    config: HostConfig,
    bus: Arc<dyn EventBus>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<(), DaemonError> {
    let repositories = paths::repositories_root(&config.base_dir);
    fs::create_dir_all(&repositories).map_err(|e| io_err(&repositories, e))?;

    let events = ModuleEvents::new(bus, config.bus.prefix.clone());
    let manager = DirectoryManager::new(&config.base_dir, Arc::new(GitVcs))
        .start(&events, shutdown.clone())
        .await?;

    let http_handle = {
        let shutdown = shutdown.clone();
        let base_dir: PathBuf = config.base_dir.clone();
        let prefix = config.http.path_prefix.clone();
        tokio::spawn(async move {
            let result = githost::serve(listener, &base_dir, &prefix, shutdown.clone()).await;
            shutdown.cancel();
            result
        })
    };

    shutdown.cancelled().await;
    tracing::info!(in_flight = manager.in_flight(), "host shutting down");

    let http_result = handle_join("git host", http_handle.await);
    manager.wait().await?;
    http_result
}

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

fn spawn_signal_listener(shutdown: CancellationToken) -> JoinHandle<Result<(), DaemonError>> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => Ok(()),
            signal = wait_for_signal() => {
                signal?;
                tracing::info!("received termination signal, shutting down");
                shutdown.cancel();
                Ok(())
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<(), DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map_err(|e| io_err("ctrl-c handler", e)),
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<(), DaemonError> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| io_err("ctrl-c handler", e))
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(join_err(task, err)),
    }
}

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default
/// `info` filter. Later calls are no-ops.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handle_join_surfaces_panics() {
        let handle = tokio::spawn(async { panic!("boom") });
        let joined: Result<Result<(), DaemonError>, _> = handle.await;
        let err = handle_join("test", joined).unwrap_err();
        assert!(matches!(err, DaemonError::Join { task: "test", .. }));
    }

    #[tokio::test]
    async fn run_client_requires_module_descriptor() {
        let dir = tempfile::TempDir::new().expect("dir");
        let config = ClientConfig {
            module_file: dir.path().join("go.mod"),
            ..ClientConfig::default()
        };
        let err = run_client(config).await.unwrap_err();
        assert!(matches!(err, DaemonError::Core(_)), "got: {err}");
    }
}
