use clap::{Parser, Subcommand};
use std::path::PathBuf;

use warren_config::{ConfigLoader, WarrenConfig};
use warren_core::{Access, Result, WarrenError};
use warren_sandbox::PermissionsBuilder;
use warren_store::SqliteAgentStore;

mod agents;
mod inspect;

/// 🐇 Warren: agent addressing, lifecycle, and message routing
#[derive(Parser)]
#[command(name = "warren", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to warren.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List agents in the store
    Agents {
        /// Only agents owned by this user
        #[arg(short, long)]
        user: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one agent: record, state, and history
    Agent {
        /// Agent id
        id: String,

        /// Number of history records to show (newest last)
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Classify an agent path: kind, parent, and owning user
    Path {
        /// Raw path, e.g. /u1/agent/a/sub/0
        path: String,
    },
    /// Check whether an agent may perform an access
    Access {
        /// Agent id
        id: String,
        /// Access kind: network, events, workspace, read, write
        kind: String,
        /// Target path for read and write
        path: Option<PathBuf>,
    },
    /// Grant an agent an additional capability
    Grant {
        /// Agent id
        id: String,
        /// Access kind: network, events, workspace, read, write
        kind: String,
        /// Directory for read and write grants
        path: Option<PathBuf>,
    },
    /// Show recorded observations, newest first
    Logs {
        /// Number of entries to show (default 50)
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,

        /// Only observations about this agent
        #[arg(short, long)]
        agent: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show version and build info
    Version,
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // Resolve log level: --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug".to_string()
        } else if self.quiet {
            "error".to_string()
        } else {
            self.log_level
                .clone()
                .unwrap_or_else(|| config.logging.level.clone())
        };
        init_tracing(&config.logging.format, &log_level);

        match self.command {
            Commands::Agents { user, json } => agents::cmd_agents(config, user, json).await,
            Commands::Agent { id, limit, json } => {
                agents::cmd_agent(config, id, limit, json).await
            }
            Commands::Path { path } => inspect::cmd_path(&path),
            Commands::Access { id, kind, path } => {
                inspect::cmd_access(config, id, parse_access(&kind, path)?).await
            }
            Commands::Grant { id, kind, path } => {
                inspect::cmd_grant(config, id, parse_access(&kind, path)?).await
            }
            Commands::Logs { limit, agent, json } => {
                agents::cmd_logs(config, limit, agent, json)
            }
            Commands::Version => Self::cmd_version(),
            Commands::Config { json } => Self::cmd_config(config, json),
        }
    }

    fn cmd_config(config: WarrenConfig, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| WarrenError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_version() -> Result<()> {
        println!("🐇 Warren v{}", env!("CARGO_PKG_VERSION"));
        println!("   Target: {}", std::env::consts::ARCH);
        println!("   OS: {}", std::env::consts::OS);
        #[cfg(debug_assertions)]
        println!("   Profile: debug");
        #[cfg(not(debug_assertions))]
        println!("   Profile: release");
        Ok(())
    }
}

/// `RUST_LOG` wins over the resolved level. A second call in one process is a no-op.
fn init_tracing(format: &str, level: &str) {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
    };
    let _ = match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .json()
            .with_target(true)
            .try_init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .compact()
            .with_target(false)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_target(false)
            .try_init(),
    };
}

pub(crate) fn open_store(config: &WarrenConfig) -> Result<SqliteAgentStore> {
    SqliteAgentStore::open(&config.store.db_path)
}

pub(crate) fn permissions_builder(config: &WarrenConfig) -> PermissionsBuilder {
    PermissionsBuilder::new(&config.sandbox.users_dir)
        .with_defaults(config.sandbox.network, config.sandbox.events)
}

/// Build an [`Access`] from a kind word and an optional path.
pub(crate) fn parse_access(kind: &str, path: Option<PathBuf>) -> Result<Access> {
    match (kind.trim_start_matches('@'), path) {
        ("read", Some(path)) => Ok(Access::read(path)),
        ("write", Some(path)) => Ok(Access::write(path)),
        ("read" | "write", None) => Err(WarrenError::InvalidPath(format!(
            "'{kind}' needs a target path"
        ))),
        (other, None) => other.parse(),
        (other, Some(_)) => Err(WarrenError::InvalidPath(format!(
            "'{other}' does not take a path"
        ))),
    }
}

/// Truncate a string to `max` characters, appending "..." if truncated.
pub(crate) fn truncate_output(s: &str, max: usize) -> String {
    let flat = s.replace('\n', " ");
    match flat.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_access_kinds() {
        assert_eq!(parse_access("network", None).unwrap(), Access::Network);
        assert_eq!(parse_access("@events", None).unwrap(), Access::Events);
        assert_eq!(
            parse_access("write", Some("/ws/a.txt".into())).unwrap(),
            Access::write("/ws/a.txt")
        );
        assert!(parse_access("read", None).is_err());
        assert!(parse_access("network", Some("/tmp".into())).is_err());
        assert!(parse_access("teleport", None).is_err());
    }

    #[test]
    fn test_truncate_output() {
        assert_eq!(truncate_output("short", 10), "short");
        assert_eq!(truncate_output("a\nb", 10), "a b");
        assert_eq!(truncate_output("abcdefgh", 3), "abc...");
        assert_eq!(truncate_output("ééééé", 2), "éé...");
    }
}
