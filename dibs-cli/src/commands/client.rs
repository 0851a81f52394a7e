//! `dibs client`: register the module and run its pipeline on every change.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use dibs_core::config::load_client_config_at;
use dibs_core::{ClientConfig, ModuleName};
use dibs_daemon::start_client_blocking;

use super::{load_or_default, BusArgs};

/// Arguments for `dibs client`.
#[derive(Args, Debug, Default)]
pub struct ClientArgs {
    /// YAML configuration file; flags override its values.
    #[arg(long, env = "DIBS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Descriptor holding the `module <name>` declaration.
    #[arg(long, env = "DIBS_MODULE_FILE")]
    pub module_file: Option<PathBuf>,

    /// Source tree to sync from.
    #[arg(long, env = "DIBS_SRC_DIR")]
    pub src_dir: Option<PathBuf>,

    /// Scratch directory the module is copied into before pushing.
    #[arg(long, env = "DIBS_PUSH_DIR")]
    pub push_dir: Option<PathBuf>,

    /// Directory watched for changes.
    #[arg(long, env = "DIBS_WATCH_DIR")]
    pub watch_dir: Option<PathBuf>,

    /// Glob of paths to ignore, relative to the source tree. Repeatable.
    #[arg(long = "ignore", env = "DIBS_IGNORE", value_delimiter = ',')]
    pub ignore: Vec<String>,

    /// Build command, split on whitespace.
    #[arg(long, env = "DIBS_BUILD")]
    pub build: Option<String>,

    /// Test command, split on whitespace.
    #[arg(long, env = "DIBS_TEST")]
    pub test: Option<String>,

    /// Long-running start command, split on whitespace.
    #[arg(long, env = "DIBS_START")]
    pub start: Option<String>,

    /// Base URL of the git host; the module name is appended.
    #[arg(long, env = "DIBS_GIT_BASE_URL")]
    pub git_base_url: Option<String>,

    /// Name of the git remote pushed to.
    #[arg(long, env = "DIBS_GIT_REMOTE_NAME")]
    pub git_remote_name: Option<String>,

    /// Commit author name.
    #[arg(long, env = "DIBS_GIT_NAME")]
    pub git_name: Option<String>,

    /// Commit author email.
    #[arg(long, env = "DIBS_GIT_EMAIL")]
    pub git_email: Option<String>,

    /// Message of every sync commit.
    #[arg(long, env = "DIBS_COMMIT_MESSAGE")]
    pub commit_message: Option<String>,

    /// Upper bound in seconds for each build and test step.
    #[arg(long, env = "DIBS_STEP_TIMEOUT")]
    pub step_timeout: Option<u64>,

    /// Quiet period in milliseconds before a burst of changes triggers a run.
    #[arg(long, env = "DIBS_DEBOUNCE_MS")]
    pub debounce_ms: Option<u64>,

    /// Module to mirror locally and refresh on every push. Repeatable.
    #[arg(long = "pull", env = "DIBS_PULL", value_delimiter = ',', value_parser = ModuleName::parse)]
    pub pull: Vec<ModuleName>,

    /// Directory the pulled modules are checked out under.
    #[arg(long, env = "DIBS_PULL_DIR")]
    pub pull_dir: Option<PathBuf>,

    #[command(flatten)]
    pub bus: BusArgs,
}

impl ClientArgs {
    pub fn run(self, json_logs: bool) -> Result<()> {
        let config = self.into_config()?;
        start_client_blocking(config, json_logs).context("client exited with error")
    }

    /// Layer defaults, the optional YAML file and the flags.
    pub fn into_config(self) -> Result<ClientConfig> {
        let mut config: ClientConfig =
            load_or_default(self.config.as_deref(), load_client_config_at)?;

        if let Some(v) = self.module_file {
            config.module_file = v;
        }
        if let Some(v) = self.src_dir {
            config.src_dir = v;
        }
        if let Some(v) = self.push_dir {
            config.push_dir = v;
        }
        if let Some(v) = self.watch_dir {
            config.watch_dir = v;
        }
        if !self.ignore.is_empty() {
            config.ignore = self.ignore;
        }
        if let Some(v) = self.build {
            config.commands.build = v;
        }
        if let Some(v) = self.test {
            config.commands.test = v;
        }
        if let Some(v) = self.start {
            config.commands.start = v;
        }
        if let Some(v) = self.git_base_url {
            config.git.base_url = v;
        }
        if let Some(v) = self.git_remote_name {
            config.git.remote_name = v;
        }
        if let Some(v) = self.git_name {
            config.git.author_name = v;
        }
        if let Some(v) = self.git_email {
            config.git.author_email = v;
        }
        if let Some(v) = self.commit_message {
            config.git.commit_message = v;
        }
        if self.step_timeout.is_some() {
            config.step_timeout_secs = self.step_timeout;
        }
        if let Some(v) = self.debounce_ms {
            config.debounce_ms = v;
        }
        if !self.pull.is_empty() {
            config.pull = self.pull;
        }
        if let Some(v) = self.pull_dir {
            config.pull_dir = v;
        }
        self.bus.apply(&mut config.bus);
        Ok(config)
    }
}
