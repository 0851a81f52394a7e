pub mod client;
pub mod host;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use dibs_core::BusConfig;

/// Event bus flags shared by `client` and `host`.
#[derive(Args, Debug, Default)]
pub struct BusArgs {
    /// Event bus address (`redis://host:port` or `host:port`).
    #[arg(long, env = "DIBS_BUS_URL")]
    pub bus_url: Option<String>,

    /// Channel prefix, so several deployments can share one bus.
    #[arg(long, env = "DIBS_BUS_PREFIX")]
    pub bus_prefix: Option<String>,
}

impl BusArgs {
    pub fn apply(self, bus: &mut BusConfig) {
        if let Some(url) = self.bus_url {
            bus.url = url;
        }
        if let Some(prefix) = self.bus_prefix {
            bus.prefix = prefix;
        }
    }
}

/// Defaults, or the YAML file at `path` when one is given.
pub fn load_or_default<T: Default>(
    path: Option<&Path>,
    load: impl FnOnce(&Path) -> Result<T, dibs_core::CoreError>,
) -> Result<T> {
    match path {
        Some(path) => load(path).with_context(|| format!("failed to load {}", path.display())),
        None => Ok(T::default()),
    }
}
