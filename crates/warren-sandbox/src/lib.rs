//! # warren-sandbox
//!
//! Capability checks for agents: secure path resolution, the access rule engine,
//! app isolation, and the builder that computes capability sets.

pub mod builder;
pub mod engine;
pub mod resolve;
pub mod rules;

pub use builder::PermissionsBuilder;
pub use engine::{AccessEngine, AgentSandbox, access_allows};
pub use resolve::{
    MAX_PATH_BYTES, ResolvedPath, is_within_secure, normalize_lexical, path_resolve_secure,
    path_sanitize, resolve_real,
};
pub use rules::{
    AccessRequest, AccessRule, AccessVerdict, POLICY_FILES, app_access_allows, is_app_policy_file,
};
