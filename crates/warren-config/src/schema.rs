use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration, loaded from `warren.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WarrenConfig {
    pub runtime: RuntimeConfig,
    pub sandbox: SandboxConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

fn warren_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".warren")
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        Err(_) => path.to_path_buf(),
    }
}

// ── Runtime ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Per-agent mailbox depth. Posts into a full mailbox are rejected.
    pub mailbox_capacity: usize,
    /// Buffer size of the in-process observation bus.
    pub observation_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            observation_capacity: 1024,
        }
    }
}

// ── Sandbox ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Sandbox root; every user gets `<users_dir>/<user_id>`.
    pub users_dir: PathBuf,
    /// Network capability granted to new agents.
    pub network: bool,
    /// Events capability granted to new agents.
    pub events: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            users_dir: warren_home().join("users"),
            network: false,
            events: false,
        }
    }
}

// ── Store ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database holding agents, state, history, and observations.
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: warren_home().join("warren.db"),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "[{}] {}: {}", tag, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, " ({})", h)?;
        }
        Ok(())
    }
}

impl WarrenConfig {
    /// Validate the config and return a list of warnings.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Mailbox ───
        if self.runtime.mailbox_capacity == 0 {
            warnings.push(ConfigWarning {
                field: "runtime.mailbox_capacity".into(),
                message: "mailbox capacity is 0, no message could ever be delivered".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 256".into()),
            });
        } else if self.runtime.mailbox_capacity > 65_536 {
            warnings.push(ConfigWarning {
                field: "runtime.mailbox_capacity".into(),
                message: format!(
                    "mailbox capacity {} lets a noisy sender queue a lot of work",
                    self.runtime.mailbox_capacity
                ),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }

        if self.runtime.observation_capacity == 0 {
            warnings.push(ConfigWarning {
                field: "runtime.observation_capacity".into(),
                message: "observation bus capacity is 0, using 1".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }

        // ── Sandbox root ───
        let users_dir = expand_home(&self.sandbox.users_dir);
        if !users_dir.is_absolute() {
            warnings.push(ConfigWarning {
                field: "sandbox.users_dir".into(),
                message: format!("'{}' is not an absolute path", self.sandbox.users_dir.display()),
                severity: WarningSeverity::Error,
                hint: Some("The sandbox root must be absolute, e.g. '~/.warren/users'".into()),
            });
        }
        if self.sandbox.network {
            warnings.push(ConfigWarning {
                field: "sandbox.network".into(),
                message: "every new agent gets network access".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Grant network per agent instead".into()),
            });
        }

        // ── Store ───
        if self.store.db_path.as_os_str().is_empty() {
            warnings.push(ConfigWarning {
                field: "store.db_path".into(),
                message: "database path is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. '~/.warren/warren.db'".into()),
            });
        }

        // ── Logging format ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Logging level ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        // Check for hard errors
        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
