//! dibs core library: domain types, event payload codec, configuration, errors.
//!
//! Public API surface:
//! - [`types`]: module names, event kinds, the per-process [`Module`] descriptor
//! - [`payload`]: `name@timestamp` encoding shared by every bus message
//! - [`config`]: immutable client/host configuration and YAML loading
//! - [`error`]: [`CoreError`]

pub mod config;
pub mod error;
pub mod payload;
pub mod types;

pub use config::{BusConfig, ClientConfig, CommandsConfig, GitConfig, HostConfig, HttpConfig};
pub use error::CoreError;
pub use types::{EventKind, Module, ModuleName};
