use thiserror::Error;

/// Unified error type for the entire Warren runtime.
#[derive(Error, Debug)]
pub enum WarrenError {
    // ── Identity errors ────────────────────────────────────────
    #[error("invalid path segment for {label}: {reason}")]
    InvalidSegment { label: String, reason: String },

    #[error("unknown path pattern: {0}")]
    UnknownPathPattern(String),

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    // ── Permission errors ──────────────────────────────────────
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    // ── Routing errors ─────────────────────────────────────────
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("agent {agent_id} belongs to another user than {user_id}")]
    CrossUser { agent_id: String, user_id: String },

    #[error("mailbox full for agent {agent_id} (capacity {capacity})")]
    MailboxFull { agent_id: String, capacity: usize },

    #[error("mailbox closed for agent {0}")]
    MailboxClosed(String),

    #[error("turn failed: {agent_id}: {reason}")]
    Turn { agent_id: String, reason: String },

    // ── Store errors ───────────────────────────────────────────
    #[error("store error: {0}")]
    Store(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl WarrenError {
    /// Identity errors are caller mistakes and are never retried.
    pub fn is_identity(&self) -> bool {
        matches!(
            self,
            WarrenError::InvalidSegment { .. }
                | WarrenError::UnknownPathPattern(_)
                | WarrenError::InvalidDescriptor(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, WarrenError>;
