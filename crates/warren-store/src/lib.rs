//! # warren-store
//!
//! SQLite implementation of the agent store. Holds agent rows with their
//! child-index counters, persisted state, append-only history, and an
//! observation log.

pub mod sqlite;

pub use sqlite::SqliteAgentStore;
