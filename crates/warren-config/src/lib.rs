//! # warren-config
//!
//! Configuration system for the Warren runtime. Reads from `warren.toml` and
//! environment variables, in that precedence order.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    ConfigWarning, LoggingConfig, RuntimeConfig, SandboxConfig, StoreConfig, WarningSeverity,
    WarrenConfig, expand_home,
};
