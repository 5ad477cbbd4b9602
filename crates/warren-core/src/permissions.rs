use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, WarrenError};

/// Capability set bounding one agent's filesystem and network access.
///
/// The set is replaced as a whole; callers recompute it instead of appending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPermissions {
    pub working_dir: PathBuf,
    #[serde(default)]
    pub write_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub read_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub network: bool,
    #[serde(default)]
    pub events: bool,
}

impl SessionPermissions {
    /// Workspace-only set: the working dir is the single writable root.
    pub fn workspace(working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        Self {
            write_dirs: vec![working_dir.clone()],
            working_dir,
            read_dirs: Vec::new(),
            network: false,
            events: false,
        }
    }

    pub fn with_write_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.write_dirs = dirs;
        self
    }

    pub fn with_read_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.read_dirs = dirs;
        self
    }

    pub fn with_network(mut self, network: bool) -> Self {
        self.network = network;
        self
    }

    pub fn with_events(mut self, events: bool) -> Self {
        self.events = events;
        self
    }
}

/// A single access request checked against a capability set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Access {
    Network,
    Events,
    Workspace,
    Read { path: PathBuf },
    Write { path: PathBuf },
}

impl Access {
    pub fn read(path: impl Into<PathBuf>) -> Self {
        Access::Read { path: path.into() }
    }

    pub fn write(path: impl Into<PathBuf>) -> Self {
        Access::Write { path: path.into() }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Access::Read { path } | Access::Write { path } => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Network => f.write_str("@network"),
            Access::Events => f.write_str("@events"),
            Access::Workspace => f.write_str("@workspace"),
            Access::Read { path } => write!(f, "@read:{}", path.display()),
            Access::Write { path } => write!(f, "@write:{}", path.display()),
        }
    }
}

/// Parses the tag form printed by `Display`; the leading `@` is optional.
impl FromStr for Access {
    type Err = WarrenError;

    fn from_str(s: &str) -> Result<Self> {
        let tag = s.trim().trim_start_matches('@');
        match tag {
            "network" => return Ok(Access::Network),
            "events" => return Ok(Access::Events),
            "workspace" => return Ok(Access::Workspace),
            _ => {}
        }
        match tag.split_once(':') {
            Some(("read", path)) if !path.is_empty() => Ok(Access::read(path)),
            Some(("write", path)) if !path.is_empty() => Ok(Access::write(path)),
            _ => Err(WarrenError::InvalidPath(format!("unknown access tag '{s}'"))),
        }
    }
}
