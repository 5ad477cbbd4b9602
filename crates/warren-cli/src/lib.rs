//! # warren-cli
//!
//! Command-line interface for inspecting a Warren agent store.
//!
//! ## Commands
//!
//! - `warren agents`: List agents, optionally for one user
//! - `warren agent <id>`: Show one agent with its history
//! - `warren path <path>`: Classify an agent path
//! - `warren access <id> <kind> [path]`: Check an agent's access
//! - `warren grant <id> <kind> [path]`: Grant an agent a capability
//! - `warren logs`: Show recorded observations
//! - `warren config`: Show configuration

pub mod commands;

pub use commands::Cli;
