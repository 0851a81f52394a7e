use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Error surface for the watcher, supervisor, lifecycle manager, pipeline
/// controller and git host.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Core(#[from] dibs_core::CoreError),

    #[error("event bus error: {0}")]
    Bus(#[from] dibs_bus::BusError),

    #[error("sync error: {0}")]
    Sync(#[from] dibs_sync::SyncError),

    #[error("command line is empty")]
    InvalidCommand,

    #[error("no {step} command configured")]
    MissingCommand { step: &'static str },

    #[error("command '{command}' exited with {status}")]
    CommandFailed { command: String, status: ExitStatus },

    #[error("command '{command}' timed out after {after:?}")]
    CommandTimedOut { command: String, after: Duration },

    #[error("command '{command}' was cancelled")]
    CommandCancelled { command: String },

    #[error("{task} task failed: {reason}")]
    Join { task: &'static str, reason: String },

    #[error("cannot bind git host to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn join_err(task: &'static str, err: tokio::task::JoinError) -> DaemonError {
    DaemonError::Join {
        task,
        reason: err.to_string(),
    }
}
