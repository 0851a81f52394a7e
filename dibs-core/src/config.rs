//! Immutable process configuration.
//!
//! Built once at startup (defaults → optional YAML file → CLI flags / env) and
//! handed to each component's constructor. Nothing below the CLI reads the
//! process environment.
//!
//! # Example `dibs.yaml` (client)
//!
//! ```yaml
//! module_file: go.mod
//! src_dir: .
//! ignore: ["target/**", "*.swp"]
//! commands:
//!   build: go build ./...
//!   test: go test ./...
//!   start: go run .
//! pull: [github.com/acme/shared]
//! bus:
//!   url: redis://localhost:6379
//!   prefix: dibs
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::types::ModuleName;

pub const DEFAULT_BUS_URL: &str = "redis://localhost:6379";
pub const DEFAULT_BUS_PREFIX: &str = "dibs";
pub const DEFAULT_GIT_BASE_URL: &str = "http://localhost:35000/repos";
pub const DEFAULT_REMOTE_NAME: &str = "dibs-sync";
pub const DEFAULT_AUTHOR_NAME: &str = "dibs-syncer";
pub const DEFAULT_AUTHOR_EMAIL: &str = "dibs-syncer@localhost";
pub const DEFAULT_COMMIT_MESSAGE: &str = "up_synced";
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_HTTP_LISTEN: &str = "127.0.0.1:35000";
pub const DEFAULT_HTTP_PATH_PREFIX: &str = "/repos";

// ---------------------------------------------------------------------------
// Shared sections
// ---------------------------------------------------------------------------

/// Event bus backend address and channel prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub url: String,
    pub prefix: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BUS_URL.to_owned(),
            prefix: DEFAULT_BUS_PREFIX.to_owned(),
        }
    }
}

impl BusConfig {
    /// The backend URL with a `redis://` scheme, accepting bare `host:port`.
    pub fn normalized_url(&self) -> String {
        if self.url.contains("://") {
            self.url.clone()
        } else {
            format!("redis://{}", self.url)
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Build/test/start command lines. Split on whitespace, no shell quoting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CommandsConfig {
    pub build: String,
    pub test: String,
    pub start: String,
}

/// Where and as whom the client pushes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub base_url: String,
    pub remote_name: String,
    pub author_name: String,
    pub author_email: String,
    pub commit_message: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GIT_BASE_URL.to_owned(),
            remote_name: DEFAULT_REMOTE_NAME.to_owned(),
            author_name: DEFAULT_AUTHOR_NAME.to_owned(),
            author_email: DEFAULT_AUTHOR_EMAIL.to_owned(),
            commit_message: DEFAULT_COMMIT_MESSAGE.to_owned(),
        }
    }
}

impl GitConfig {
    /// `<base_url>/<module>`: the remote a module is pushed to.
    pub fn remote_url(&self, module: &ModuleName) -> String {
        format!("{}/{module}", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Descriptor file holding the `module <name>` declaration.
    pub module_file: PathBuf,
    pub src_dir: PathBuf,
    pub push_dir: PathBuf,
    pub watch_dir: PathBuf,
    pub ignore: Vec<String>,
    pub commands: CommandsConfig,
    pub git: GitConfig,
    pub bus: BusConfig,
    /// Upper bound for each build/test step; `None` waits forever.
    pub step_timeout_secs: Option<u64>,
    pub debounce_ms: u64,
    /// Other modules kept checked out locally, refreshed on every push.
    pub pull: Vec<ModuleName>,
    /// Pulled modules land in `<pull_dir>/<module>`.
    pub pull_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            module_file: PathBuf::from("go.mod"),
            src_dir: PathBuf::from("."),
            push_dir: default_push_dir(),
            watch_dir: PathBuf::from("."),
            ignore: Vec::new(),
            commands: CommandsConfig::default(),
            git: GitConfig::default(),
            bus: BusConfig::default(),
            step_timeout_secs: None,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            pull: Vec::new(),
            pull_dir: default_pull_dir(),
        }
    }
}

/// `<tmp>/dibs/push/<pid>`: unique per client process.
pub fn default_push_dir() -> PathBuf {
    per_process_dir("push")
}

/// `<tmp>/dibs/pull/<pid>`
pub fn default_pull_dir() -> PathBuf {
    per_process_dir("pull")
}

fn per_process_dir(kind: &str) -> PathBuf {
    std::env::temp_dir()
        .join("dibs")
        .join(kind)
        .join(std::process::id().to_string())
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// Git smart-HTTP listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub listen: String,
    pub path_prefix: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_HTTP_LISTEN.to_owned(),
            path_prefix: DEFAULT_HTTP_PATH_PREFIX.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Repositories live under `<base_dir>/repositories/`.
    pub base_dir: PathBuf,
    pub bus: BusConfig,
    pub http: HttpConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            bus: BusConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn repositories_dir(&self) -> PathBuf {
        self.base_dir.join("repositories")
    }
}

/// `~/.dibs`, falling back to `<tmp>/dibs` when no home directory exists.
pub fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".dibs"))
        .unwrap_or_else(|| std::env::temp_dir().join("dibs"))
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

pub fn load_client_config_at(path: &Path) -> Result<ClientConfig, CoreError> {
    load_yaml(path)
}

pub fn load_host_config_at(path: &Path) -> Result<HostConfig, CoreError> {
    load_yaml(path)
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CoreError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|source| CoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Read the module name from the first `module <name>` line of a descriptor
/// such as `go.mod`.
pub fn read_module_name(path: &Path) -> Result<ModuleName, CoreError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    parse_module_declaration(&contents)
        .ok_or_else(|| CoreError::ModuleDeclarationMissing {
            path: path.to_path_buf(),
        })
        .and_then(ModuleName::parse)
}

fn parse_module_declaration(contents: &str) -> Option<&str> {
    contents.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix("module")?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let name = rest.trim().trim_matches('"');
        (!name.is_empty()).then_some(name)
    })
}
