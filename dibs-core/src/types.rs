//! Domain types shared by the client and host processes.
//!
//! All path fields use `PathBuf`; module names are validated once at the edge
//! and carried as [`ModuleName`] from then on.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::{ClientConfig, CommandsConfig};
use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A validated module name: one or more `/`-separated path segments.
///
/// Names never contain `@` (the payload separator) and never contain empty,
/// `.` or `..` segments, so they always map to a path below the host's
/// repository root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModuleName(String);

impl ModuleName {
    /// Validate `raw` as-is. Callers reading names from files trim first.
    pub fn parse(name: &str) -> Result<Self, CoreError> {
        let invalid = |reason| CoreError::InvalidModuleName {
            name: name.to_owned(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("name is empty"));
        }
        if name.contains('@') {
            return Err(invalid("name must not contain '@'"));
        }
        if name.starts_with('/') {
            return Err(invalid("name must be relative"));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(invalid("name must not contain whitespace"));
        }
        if name.contains('\\') || name.chars().any(char::is_control) {
            return Err(invalid("name contains a forbidden character"));
        }
        for segment in name.split('/') {
            match segment {
                "" => return Err(invalid("name contains an empty segment")),
                "." | ".." => return Err(invalid("name contains a relative segment")),
                _ => {}
            }
        }

        Ok(Self(name.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `/`-separated segments of the name.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// `<root>/<segment>/<segment>/…`: pure, no I/O.
    pub fn path_under(&self, root: &Path) -> PathBuf {
        self.segments().fold(root.to_path_buf(), |acc, s| acc.join(s))
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ModuleName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ModuleName {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ModuleName> for String {
    fn from(name: ModuleName) -> Self {
        name.0
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The fixed set of lifecycle events published on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ModuleRegistered,
    ModuleUnregistered,
    ModuleBuilt,
    ModuleTested,
    ModulePushed,
    ModuleStarted,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::ModuleRegistered,
        EventKind::ModuleUnregistered,
        EventKind::ModuleBuilt,
        EventKind::ModuleTested,
        EventKind::ModulePushed,
        EventKind::ModuleStarted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ModuleRegistered => "module_registered",
            EventKind::ModuleUnregistered => "module_unregistered",
            EventKind::ModuleBuilt => "module_built",
            EventKind::ModuleTested => "module_tested",
            EventKind::ModulePushed => "module_pushed",
            EventKind::ModuleStarted => "module_started",
        }
    }

    /// `<prefix>:<kind>`: the backend channel this kind travels on.
    pub fn channel(self, prefix: &str) -> String {
        format!("{prefix}:{}", self.as_str())
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoreError::UnknownEventKind(s.to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// The module a client process develops, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub name: ModuleName,
    /// Source tree the developer edits.
    pub src_dir: PathBuf,
    /// Scratch copy that gets committed and pushed.
    pub push_dir: PathBuf,
    pub commands: CommandsConfig,
    /// Glob patterns, relative to `src_dir`, excluded from watching and staging.
    pub ignore: Vec<String>,
}

impl Module {
    pub fn from_config(name: ModuleName, config: &ClientConfig) -> Self {
        Self {
            name,
            src_dir: config.src_dir.clone(),
            push_dir: config.push_dir.clone(),
            commands: config.commands.clone(),
            ignore: config.ignore.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_name_display() {
        let name = ModuleName::parse("services/api").expect("valid");
        assert_eq!(name.to_string(), "services/api");
        assert_eq!(name.segments().collect::<Vec<_>>(), ["services", "api"]);
    }

    #[test]
    fn module_name_is_never_altered() {
        for raw in ["  github.com/acme/api", "github.com/acme/api\r", "a b"] {
            let err = ModuleName::parse(raw).unwrap_err();
            assert!(matches!(err, CoreError::InvalidModuleName { .. }), "got: {err}");
        }
        let name = ModuleName::parse("github.com/acme/api").expect("valid");
        assert_eq!(name.as_str(), "github.com/acme/api");
    }

    #[test]
    fn module_name_path_under_root() {
        let name = ModuleName::parse("services/api").expect("valid");
        assert_eq!(
            name.path_under(Path::new("/var/dibs/repositories")),
            PathBuf::from("/var/dibs/repositories/services/api")
        );
    }

    #[test]
    fn module_name_serde_rejects_invalid() {
        let err = serde_yaml::from_str::<ModuleName>("\"a/../b\"");
        assert!(err.is_err());
    }

    #[test]
    fn event_kind_channel_names() {
        assert_eq!(
            EventKind::ModuleRegistered.channel("dibs"),
            "dibs:module_registered"
        );
        assert_eq!(EventKind::ModuleStarted.to_string(), "module_started");
    }

    #[test]
    fn event_kind_from_str_roundtrip() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().expect("parse"), kind);
        }
        assert!("module_exploded".parse::<EventKind>().is_err());
    }
}
