//! Client-side pipeline: sync → build → test → push → start.
//!
//! One [`PipelineController`] per module. Runs never overlap: the controller
//! only takes the next change notification after the previous run's sync,
//! build, test and push steps have returned. The long-running start process
//! is the exception; each new run kills it without waiting and replaces it.
//!
//! Every completed stage publishes its event before the next stage begins, so
//! stage events of one run reach the bus in pipeline order.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dibs_bus::ModuleEvents;
use dibs_core::{EventKind, GitConfig, Module};
use dibs_sync::{sync_tree, Author, IgnoreFilter, StagingReport, SyncError, Vcs};
use tokio_util::sync::CancellationToken;

use crate::error::{io_err, join_err, DaemonError};
use crate::paths::KILL_GRACE;
use crate::supervisor::{run_blocking, CommandLine, SupervisedProcess};
use crate::watcher::FolderWatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Syncing,
    Building,
    Testing,
    Pushing,
    Starting,
}

/// How a single run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every stage passed and the start process is running.
    Started { pid: Option<u32> },
    /// `stage` failed; later stages did not run.
    Aborted {
        stage: PipelineState,
        error: DaemonError,
    },
}

impl RunOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, RunOutcome::Started { .. })
    }
}

#[derive(Debug, Clone)]
struct Commands {
    build: CommandLine,
    test: CommandLine,
    start: CommandLine,
}

pub struct PipelineController {
    module: Module,
    git: GitConfig,
    commands: Commands,
    events: ModuleEvents,
    vcs: Arc<dyn Vcs>,
    filter: IgnoreFilter,
    step_timeout: Option<Duration>,
    cancel: CancellationToken,
    state: PipelineState,
    process: Option<SupervisedProcess>,
}

impl PipelineController {
    /// Validate the module's commands and prepare its push directory.
    pub fn new(
        module: Module,
        git: GitConfig,
        events: ModuleEvents,
        vcs: Arc<dyn Vcs>,
    ) -> Result<Self, DaemonError> {
        let parse = |line: &str, step| {
            CommandLine::parse(line).map_err(|_| DaemonError::MissingCommand { step })
        };
        let commands = Commands {
            build: parse(&module.commands.build, "build")?,
            test: parse(&module.commands.test, "test")?,
            start: parse(&module.commands.start, "start")?,
        };

        // The push dir must exist so the filter resolves it to the same real
        // path the watcher reports.
        std::fs::create_dir_all(&module.push_dir).map_err(|e| io_err(&module.push_dir, e))?;
        let filter = IgnoreFilter::new(&module.src_dir, &module.ignore)?.exclude_dir(&module.push_dir);

        Ok(Self {
            module,
            git,
            commands,
            events,
            vcs,
            filter,
            step_timeout: None,
            cancel: CancellationToken::new(),
            state: PipelineState::Idle,
            process: None,
        })
    }

    /// Bound each build and test step.
    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Token that stops [`PipelineController::run`] and cancels an in-flight
    /// build or test step.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Keep `dir` out of watching and staging. It must already exist.
    pub fn exclude_dir(mut self, dir: &Path) -> Self {
        self.filter = self.filter.exclude_dir(dir);
        self
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// The filter the watcher must share, so pipeline writes never trigger it.
    pub fn filter(&self) -> &IgnoreFilter {
        &self.filter
    }

    pub fn process(&self) -> Option<&SupervisedProcess> {
        self.process.as_ref()
    }

    /// Announce the module to the host. Failure is a setup error.
    pub async fn register(&self) -> Result<(), DaemonError> {
        self.events
            .publish(EventKind::ModuleRegistered, &self.module.name)
            .await?;
        tracing::info!(module = %self.module.name, "module registered");
        Ok(())
    }

    /// Kill the start process and announce the module is gone.
    pub async fn unregister(&mut self) -> Result<(), DaemonError> {
        if let Some(mut process) = self.process.take() {
            if process.kill_and_wait(KILL_GRACE).await.is_none() {
                tracing::warn!(
                    module = %self.module.name,
                    command = process.command(),
                    "start process did not exit within grace period"
                );
            }
        }
        self.events
            .publish(EventKind::ModuleUnregistered, &self.module.name)
            .await?;
        tracing::info!(module = %self.module.name, "module unregistered");
        Ok(())
    }

    /// Run once immediately, then once per change until cancelled or the
    /// watcher ends.
    pub async fn run(&mut self, watcher: &mut FolderWatcher) {
        self.run_once().await;
        loop {
            let change = tokio::select! {
                _ = self.cancel.cancelled() => break,
                change = watcher.next() => change,
            };
            if change.is_none() {
                tracing::info!(module = %self.module.name, "watcher stopped");
                break;
            }
            self.run_once().await;
        }
    }

    /// One pipeline run. Never fails the process: a failing stage aborts the
    /// run and leaves the controller idle.
    pub async fn run_once(&mut self) -> RunOutcome {
        self.preempt();
        let outcome = match self.execute().await {
            Ok(pid) => RunOutcome::Started { pid },
            Err(error) => {
                tracing::error!(
                    module = %self.module.name,
                    stage = ?self.state,
                    error = %error,
                    "pipeline run aborted"
                );
                RunOutcome::Aborted {
                    stage: self.state,
                    error,
                }
            }
        };
        self.enter(PipelineState::Idle);
        outcome
    }

    /// Fire-and-forget kill of the previous start process.
    fn preempt(&mut self) {
        if let Some(previous) = self.process.take() {
            if previous.is_alive() {
                tracing::info!(
                    module = %self.module.name,
                    pid = ?previous.pid(),
                    "stopping previous start process"
                );
            }
            previous.kill();
        }
    }

    async fn execute(&mut self) -> Result<Option<u32>, DaemonError> {
        self.enter(PipelineState::Syncing);
        let report = self.sync().await?;
        tracing::debug!(module = %self.module.name, files = report.files, dirs = report.dirs, "push directory synced");

        self.enter(PipelineState::Building);
        self.step(&self.commands.build).await?;
        self.publish(EventKind::ModuleBuilt).await;

        self.enter(PipelineState::Testing);
        self.step(&self.commands.test).await?;
        self.publish(EventKind::ModuleTested).await;

        self.enter(PipelineState::Pushing);
        let commit = self.push().await?;
        tracing::info!(module = %self.module.name, commit = %commit, "pushed");
        self.publish(EventKind::ModulePushed).await;

        self.enter(PipelineState::Starting);
        let process = SupervisedProcess::spawn(&self.commands.start, Some(self.module.src_dir.as_path()))?;
        let pid = process.pid();
        self.process = Some(process);
        self.publish(EventKind::ModuleStarted).await;
        Ok(pid)
    }

    async fn sync(&self) -> Result<StagingReport, DaemonError> {
        let src = self.module.src_dir.clone();
        let dest = self.module.push_dir.clone();
        let filter = self.filter.clone();
        let report = tokio::task::spawn_blocking(move || sync_tree(&src, &dest, &filter))
            .await
            .map_err(|e| join_err("sync", e))??;
        Ok(report)
    }

    async fn step(&self, command: &CommandLine) -> Result<(), DaemonError> {
        run_blocking(
            command,
            Some(self.module.src_dir.as_path()),
            &self.cancel,
            self.step_timeout,
        )
        .await
    }

    async fn push(&self) -> Result<String, DaemonError> {
        let vcs = Arc::clone(&self.vcs);
        let dir = self.module.push_dir.clone();
        let git = self.git.clone();
        let url = git.remote_url(&self.module.name);
        let commit = tokio::task::spawn_blocking(move || push_blocking(vcs.as_ref(), &dir, &git, &url))
            .await
            .map_err(|e| join_err("push", e))??;
        Ok(commit)
    }

    /// Bus failures never abort a run.
    async fn publish(&self, kind: EventKind) {
        if let Err(err) = self.events.publish(kind, &self.module.name).await {
            tracing::warn!(module = %self.module.name, event = %kind, error = %err, "publish failed");
        }
    }

    fn enter(&mut self, state: PipelineState) {
        if state != PipelineState::Idle {
            tracing::info!(module = %self.module.name, stage = ?state, "stage started");
        }
        self.state = state;
    }
}

fn push_blocking(vcs: &dyn Vcs, dir: &Path, git: &GitConfig, url: &str) -> Result<String, SyncError> {
    vcs.open_or_init(dir)?;
    vcs.ensure_remote(dir, &git.remote_name, url)?;
    let commit = vcs.commit_all(dir, &git.commit_message, &Author::from(git))?;
    vcs.push(dir, &git.remote_name, None)?;
    Ok(commit)
}

#[cfg(test)]
mod tests {
    use dibs_bus::MemoryBus;
    use dibs_core::{CommandsConfig, ModuleName};
    use dibs_sync::GitVcs;
    use tempfile::TempDir;

    use super::*;

    fn module(src: &Path, push: &Path, commands: CommandsConfig) -> Module {
        Module {
            name: ModuleName::parse("services/api").expect("name"),
            src_dir: src.to_path_buf(),
            push_dir: push.to_path_buf(),
            commands,
            ignore: Vec::new(),
        }
    }

    fn events(bus: &MemoryBus) -> ModuleEvents {
        ModuleEvents::new(Arc::new(bus.clone()), "dibs")
    }

    #[test]
    fn empty_command_is_rejected_up_front() {
        let src = TempDir::new().expect("src");
        let push = TempDir::new().expect("push");
        let commands = CommandsConfig {
            build: "true".into(),
            test: "  ".into(),
            start: "sleep 1".into(),
        };
        let result = PipelineController::new(
            module(src.path(), push.path(), commands),
            GitConfig::default(),
            events(&MemoryBus::new()),
            Arc::new(GitVcs),
        );
        assert!(matches!(
            result,
            Err(DaemonError::MissingCommand { step: "test" })
        ));
    }

    #[test]
    fn excluded_dir_is_hidden_from_the_filter() {
        let src = TempDir::new().expect("src");
        let push = TempDir::new().expect("push");
        let pulled = src.path().join("vendor/shared");
        std::fs::create_dir_all(&pulled).expect("mkdir");
        let commands = CommandsConfig {
            build: "true".into(),
            test: "true".into(),
            start: "true".into(),
        };
        let controller = PipelineController::new(
            module(src.path(), push.path(), commands),
            GitConfig::default(),
            events(&MemoryBus::new()),
            Arc::new(GitVcs),
        )
        .expect("controller");
        let lib = controller.filter().root().join("vendor/shared/lib.go");
        assert!(!controller.filter().is_ignored(&lib));

        let controller = controller.exclude_dir(&pulled);
        let root = controller.filter().root().to_path_buf();
        assert!(controller.filter().is_ignored(&lib));
        assert!(!controller.filter().is_ignored(&root.join("main.go")));
    }

    #[tokio::test]
    async fn register_and_unregister_publish_lifecycle_events() {
        let src = TempDir::new().expect("src");
        let push = TempDir::new().expect("push");
        let bus = MemoryBus::new();
        let commands = CommandsConfig {
            build: "true".into(),
            test: "true".into(),
            start: "sleep 30".into(),
        };
        let mut controller = PipelineController::new(
            module(src.path(), push.path(), commands),
            GitConfig::default(),
            events(&bus),
            Arc::new(GitVcs),
        )
        .expect("controller");

        controller.register().await.expect("register");
        controller.unregister().await.expect("unregister");

        let registered = bus.history_for("dibs:module_registered");
        let unregistered = bus.history_for("dibs:module_unregistered");
        assert_eq!(registered.len(), 1);
        assert_eq!(unregistered.len(), 1);
        assert!(registered[0].starts_with("services/api@"));
    }

    #[tokio::test]
    async fn register_fails_when_bus_is_down() {
        let src = TempDir::new().expect("src");
        let push = TempDir::new().expect("push");
        let bus = MemoryBus::new();
        bus.set_offline(true);
        let commands = CommandsConfig {
            build: "true".into(),
            test: "true".into(),
            start: "true".into(),
        };
        let controller = PipelineController::new(
            module(src.path(), push.path(), commands),
            GitConfig::default(),
            events(&bus),
            Arc::new(GitVcs),
        )
        .expect("controller");

        assert!(matches!(
            controller.register().await,
            Err(DaemonError::Bus(_))
        ));
    }

    #[tokio::test]
    async fn step_timeout_aborts_the_run() {
        let src = TempDir::new().expect("src");
        let push = TempDir::new().expect("push");
        let bus = MemoryBus::new();
        let commands = CommandsConfig {
            build: "sleep 30".into(),
            test: "true".into(),
            start: "true".into(),
        };
        let mut controller = PipelineController::new(
            module(src.path(), push.path(), commands),
            GitConfig::default(),
            events(&bus),
            Arc::new(GitVcs),
        )
        .expect("controller")
        .with_step_timeout(Some(Duration::from_millis(100)));

        match controller.run_once().await {
            RunOutcome::Aborted { stage, error } => {
                assert_eq!(stage, PipelineState::Building);
                assert!(matches!(error, DaemonError::CommandTimedOut { .. }), "got: {error}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(controller.state(), PipelineState::Idle);
        assert!(bus.history().is_empty());
    }
}
