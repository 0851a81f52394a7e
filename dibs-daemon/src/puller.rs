//! Client-side mirror of other modules.
//!
//! Every module in the pull list is checked out below `<pull_dir>/<module>`
//! once at startup and again each time its owner publishes `module_pushed`.
//! Pulls run one at a time on a single worker. A failed pull is logged and
//! retried on the next push.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dibs_bus::{EventStream, ModuleEvents};
use dibs_core::{EventKind, GitConfig, ModuleName};
use dibs_sync::{SyncError, Vcs};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{io_err, join_err, DaemonError};

pub struct ModulePuller {
    modules: HashSet<ModuleName>,
    pull_dir: PathBuf,
    git: GitConfig,
    vcs: Arc<dyn Vcs>,
}

impl ModulePuller {
    pub fn new(
        modules: impl IntoIterator<Item = ModuleName>,
        pull_dir: impl Into<PathBuf>,
        git: GitConfig,
        vcs: Arc<dyn Vcs>,
    ) -> Self {
        Self {
            modules: modules.into_iter().collect(),
            pull_dir: pull_dir.into(),
            git,
            vcs,
        }
    }

    pub fn pull_dir(&self) -> &Path {
        &self.pull_dir
    }

    pub fn module_dir(&self, module: &ModuleName) -> PathBuf {
        module.path_under(&self.pull_dir)
    }

    pub fn is_pulled(&self, module: &ModuleName) -> bool {
        self.modules.contains(module)
    }

    /// Fetch `module` from the git host and check it out. `None` means the
    /// remote exists but nothing was pushed yet.
    pub async fn pull(&self, module: &ModuleName) -> Result<Option<String>, DaemonError> {
        let dir = self.module_dir(module);
        let url = self.git.remote_url(module);
        let remote = self.git.remote_name.clone();
        let vcs = Arc::clone(&self.vcs);
        let commit = tokio::task::spawn_blocking(move || {
            pull_blocking(vcs.as_ref(), &dir, &remote, &url)
        })
        .await
        .map_err(|e| join_err("pull", e))??;
        Ok(commit)
    }

    /// Subscribe to `module_pushed`, pull every listed module once, then
    /// keep them current until `shutdown` fires.
    pub async fn start(
        self,
        events: &ModuleEvents,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>, DaemonError> {
        std::fs::create_dir_all(&self.pull_dir).map_err(|e| io_err(&self.pull_dir, e))?;
        let pushed = events.subscribe(EventKind::ModulePushed).await?;
        tracing::info!(
            pull_dir = %self.pull_dir.display(),
            modules = self.modules.len(),
            "module puller started"
        );
        Ok(tokio::spawn(pull_worker(self, pushed, shutdown)))
    }

    async fn refresh(&self, module: &ModuleName) {
        match self.pull(module).await {
            Ok(Some(commit)) => {
                tracing::info!(module = %module, commit = %commit, "module pulled");
            }
            Ok(None) => {
                tracing::debug!(module = %module, "nothing pushed yet");
            }
            Err(err) => {
                tracing::warn!(module = %module, error = %err, "pull failed");
            }
        }
    }
}

fn pull_blocking(
    vcs: &dyn Vcs,
    dir: &Path,
    remote: &str,
    url: &str,
) -> Result<Option<String>, SyncError> {
    std::fs::create_dir_all(dir).map_err(|e| SyncError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    vcs.open_or_init(dir)?;
    vcs.ensure_remote(dir, remote, url)?;
    vcs.pull(dir, remote)
}

async fn pull_worker(puller: ModulePuller, mut pushed: EventStream, shutdown: CancellationToken) {
    let mut initial: Vec<&ModuleName> = puller.modules.iter().collect();
    initial.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    for module in initial {
        if shutdown.is_cancelled() {
            return;
        }
        puller.refresh(module).await;
    }

    loop {
        let item = tokio::select! {
            _ = shutdown.cancelled() => break,
            item = pushed.next() => item,
        };
        match item {
            Some(Ok(event)) if puller.is_pulled(&event.module) => {
                puller.refresh(&event.module).await;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                tracing::warn!(error = %err, "dropping malformed push event");
            }
            None => {
                tracing::warn!("push subscription ended; pulled modules will go stale");
                break;
            }
        }
    }
}
