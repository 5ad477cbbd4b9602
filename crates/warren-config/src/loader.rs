use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use warren_core::{Result, WarrenError};

use crate::schema::{WarrenConfig, expand_home};

/// Loads and reloads the Warren configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<WarrenConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > WARREN_CONFIG env > ~/.warren/warren.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("WARREN_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".warren")
            .join("warren.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::parse_file(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            WarrenConfig::default()
        };

        let config = Self::finish(config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Build a loader around an in-memory config (no file behind it).
    pub fn from_config(config: WarrenConfig) -> Result<Self> {
        Ok(Self {
            config: Arc::new(RwLock::new(Self::finish(config)?)),
            config_path: PathBuf::new(),
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> WarrenConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<WarrenConfig>> {
        Arc::clone(&self.config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Reload the config from disk. The current config is kept when the file is invalid.
    pub fn reload(&self) -> Result<()> {
        if !self.config_path.exists() {
            return Err(WarrenError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::finish(Self::parse_file(&self.config_path)?)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    fn parse_file(path: &Path) -> Result<WarrenConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<WarrenConfig>(&raw).map_err(|e| {
            WarrenError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Env overrides, home expansion, then validation (warnings logged, errors returned).
    fn finish(config: WarrenConfig) -> Result<WarrenConfig> {
        let mut config = Self::apply_overrides(config, |key| std::env::var(key).ok());
        config.sandbox.users_dir = expand_home(&config.sandbox.users_dir);
        config.store.db_path = expand_home(&config.store.db_path);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => return Err(WarrenError::Config(e)),
        }
        Ok(config)
    }

    /// Apply overrides (WARREN_LOG_LEVEL, WARREN_DB_PATH, ...) read through `var`.
    pub fn apply_overrides(
        mut config: WarrenConfig,
        var: impl Fn(&str) -> Option<String>,
    ) -> WarrenConfig {
        if let Some(v) = var("WARREN_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = var("WARREN_LOG_FORMAT") {
            config.logging.format = v;
        }
        if let Some(v) = var("WARREN_DB_PATH") {
            config.store.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("WARREN_USERS_DIR") {
            config.sandbox.users_dir = PathBuf::from(v);
        }
        if let Some(v) = var("WARREN_MAILBOX_CAPACITY") {
            match v.parse::<usize>() {
                Ok(capacity) => config.runtime.mailbox_capacity = capacity,
                Err(_) => warn!(value = %v, "ignoring non-numeric WARREN_MAILBOX_CAPACITY"),
            }
        }
        config
    }
}
