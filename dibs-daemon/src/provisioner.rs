//! Host-side directory lifecycle.
//!
//! One worker per event kind. Each `module_registered` event is handed to its
//! own tracked task, which wipes `<base>/repositories/<module>`, recreates it
//! and initialises a bare repository there. `module_unregistered` is only
//! logged; the stale directory is reclaimed by the next registration of the
//! same name.
//!
//! A failed provisioning is logged and the event dropped. Registrations of
//! the same name are not serialized against each other.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dibs_bus::{EventStream, ModuleEvents};
use dibs_core::{EventKind, ModuleName};
use dibs_sync::staging::reset_dir;
use dibs_sync::Vcs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{join_err, DaemonError};
use crate::paths;

/// Owns the repository directories below `<base>/repositories`.
pub struct DirectoryManager {
    base_dir: PathBuf,
    vcs: Arc<dyn Vcs>,
}

impl DirectoryManager {
    pub fn new(base_dir: impl Into<PathBuf>, vcs: Arc<dyn Vcs>) -> Self {
        Self {
            base_dir: base_dir.into(),
            vcs,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn repository_path(&self, module: &ModuleName) -> PathBuf {
        paths::repository_path(&self.base_dir, module)
    }

    /// Wipe, recreate and initialise the repository for `module`.
    pub async fn provision(&self, module: &ModuleName) -> Result<PathBuf, DaemonError> {
        let path = self.repository_path(module);
        let vcs = Arc::clone(&self.vcs);
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), DaemonError> {
            reset_dir(&target)?;
            vcs.init_bare(&target)?;
            Ok(())
        })
        .await
        .map_err(|e| join_err("provision", e))??;
        Ok(path)
    }

    /// Unregistration leaves the directory in place.
    pub fn release(&self, module: &ModuleName) {
        tracing::info!(
            module = %module,
            path = %self.repository_path(module).display(),
            "module unregistered; directory kept until next registration"
        );
    }

    /// Subscribe to both lifecycle channels, then start the workers.
    ///
    /// Returns once both subscriptions are confirmed, so any registration
    /// published afterwards is handled. A worker whose subscription ends
    /// cancels `shutdown`.
    pub async fn start(
        self,
        events: &ModuleEvents,
        shutdown: CancellationToken,
    ) -> Result<ManagerHandle, DaemonError> {
        let registered = events.subscribe(EventKind::ModuleRegistered).await?;
        let unregistered = events.subscribe(EventKind::ModuleUnregistered).await?;

        let manager = Arc::new(self);
        let tracker = TaskTracker::new();

        let register_worker = tokio::spawn(registration_worker(
            Arc::clone(&manager),
            registered,
            tracker.clone(),
            shutdown.clone(),
        ));
        let unregister_worker = tokio::spawn(unregistration_worker(
            Arc::clone(&manager),
            unregistered,
            shutdown.clone(),
        ));

        tracing::info!(
            base_dir = %manager.base_dir.display(),
            prefix = events.prefix(),
            "directory lifecycle manager started"
        );
        Ok(ManagerHandle {
            tracker,
            workers: vec![register_worker, unregister_worker],
        })
    }
}

/// Running lifecycle workers.
#[derive(Debug)]
pub struct ManagerHandle {
    tracker: TaskTracker,
    workers: Vec<JoinHandle<()>>,
}

impl ManagerHandle {
    /// Number of provisioning tasks still in flight.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for both workers to stop (after shutdown is cancelled) and for
    /// every provisioning task they spawned to finish.
    pub async fn wait(self) -> Result<(), DaemonError> {
        let mut result = Ok(());
        for worker in self.workers {
            if let Err(err) = worker.await {
                result = Err(join_err("lifecycle worker", err));
            }
        }
        self.tracker.close();
        self.tracker.wait().await;
        result
    }
}

async fn registration_worker(
    manager: Arc<DirectoryManager>,
    mut stream: EventStream,
    tracker: TaskTracker,
    shutdown: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = shutdown.cancelled() => break,
            item = stream.next() => item,
        };
        let Some(item) = item else {
            tracing::error!(event = %stream.kind(), "subscription ended; stopping host");
            shutdown.cancel();
            break;
        };
        let event = match item {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed registration");
                continue;
            }
        };

        let manager = Arc::clone(&manager);
        tracker.spawn(async move {
            let module = event.module;
            tracing::info!(module = %module, timestamp = event.timestamp, "module registered");
            match manager.provision(&module).await {
                Ok(path) => {
                    tracing::info!(module = %module, path = %path.display(), "repository provisioned");
                }
                Err(err) => {
                    tracing::error!(module = %module, error = %err, "provisioning failed; event dropped");
                }
            }
        });
    }
}

async fn unregistration_worker(
    manager: Arc<DirectoryManager>,
    mut stream: EventStream,
    shutdown: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = shutdown.cancelled() => break,
            item = stream.next() => item,
        };
        match item {
            Some(Ok(event)) => manager.release(&event.module),
            Some(Err(err)) => {
                tracing::warn!(error = %err, "dropping malformed unregistration");
            }
            None => {
                tracing::error!(event = %stream.kind(), "subscription ended; stopping host");
                shutdown.cancel();
                break;
            }
        }
    }
}
