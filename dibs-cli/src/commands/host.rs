//! `dibs host`: provision module repositories and serve them over HTTP.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use dibs_core::config::load_host_config_at;
use dibs_core::HostConfig;
use dibs_daemon::start_host_blocking;

use super::{load_or_default, BusArgs};

/// Arguments for `dibs host`.
#[derive(Args, Debug, Default)]
pub struct HostArgs {
    /// YAML configuration file; flags override its values.
    #[arg(long, env = "DIBS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding `repositories/`.
    #[arg(long, env = "DIBS_BASE_DIR")]
    pub base_dir: Option<PathBuf>,

    /// Address the git smart-HTTP server binds to.
    #[arg(long, env = "DIBS_LISTEN")]
    pub listen: Option<String>,

    /// URL path prefix repositories are served under.
    #[arg(long, env = "DIBS_PATH_PREFIX")]
    pub path_prefix: Option<String>,

    #[command(flatten)]
    pub bus: BusArgs,
}

impl HostArgs {
    pub fn run(self, json_logs: bool) -> Result<()> {
        let config = self.into_config()?;
        start_host_blocking(config, json_logs).context("host exited with error")
    }

    pub fn into_config(self) -> Result<HostConfig> {
        let mut config: HostConfig = load_or_default(self.config.as_deref(), load_host_config_at)?;

        if let Some(v) = self.base_dir {
            config.base_dir = v;
        }
        if let Some(v) = self.listen {
            config.http.listen = v;
        }
        if let Some(v) = self.path_prefix {
            config.http.path_prefix = v;
        }
        self.bus.apply(&mut config.bus);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = HostArgs {
            base_dir: Some(PathBuf::from("/srv/dibs")),
            listen: Some("0.0.0.0:9000".into()),
            bus: BusArgs {
                bus_url: Some("10.0.0.5:6379".into()),
                bus_prefix: None,
            },
            ..HostArgs::default()
        };
        let config = args.into_config().expect("config");

        assert_eq!(config.base_dir, PathBuf::from("/srv/dibs"));
        assert_eq!(config.http.listen, "0.0.0.0:9000");
        assert_eq!(config.http.path_prefix, "/repos");
        assert_eq!(config.bus.normalized_url(), "redis://10.0.0.5:6379");
    }
}
