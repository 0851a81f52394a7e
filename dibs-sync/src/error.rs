//! Error types for dibs-sync.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from staging and VCS operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory traversal failed while copying the source tree.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// An ignore pattern is not a valid glob.
    #[error("invalid ignore pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// Any libgit2 failure.
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// HEAD does not point at a branch, so there is nothing to push.
    #[error("repository at {path} has a detached HEAD")]
    DetachedHead { path: PathBuf },

    /// The remote accepted the connection but refused the ref update.
    #[error("push to '{remote}' rejected: {reason}")]
    PushRejected { remote: String, reason: String },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
