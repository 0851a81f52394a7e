//! Error types for dibs-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from core parsing, decoding and config loading.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on config load: includes file path and serde_yaml context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A bus payload did not have the `<module>@<timestamp>` shape.
    #[error("malformed event payload '{payload}': {reason}")]
    MalformedPayload { payload: String, reason: &'static str },

    /// A module name that cannot be mapped onto repository path segments.
    #[error("invalid module name '{name}': {reason}")]
    InvalidModuleName { name: String, reason: &'static str },

    /// The module descriptor file has no `module <name>` line.
    #[error("no module declaration found in {path}")]
    ModuleDeclarationMissing { path: PathBuf },

    /// Unknown event kind string.
    #[error("unknown event kind '{0}'")]
    UnknownEventKind(String),
}

/// Convenience constructor for [`CoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
