use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::descriptor::AgentDescriptor;
use crate::error::{Result, WarrenError};
use crate::path::{AgentPath, ChildKind};
use crate::permissions::SessionPermissions;

pub type AgentId = String;
pub type UserId = String;

/// Suspend state of a durable agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLifecycle {
    #[default]
    Active,
    Sleeping,
}

impl AgentLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentLifecycle::Active => "active",
            AgentLifecycle::Sleeping => "sleeping",
        }
    }
}

impl fmt::Display for AgentLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentLifecycle {
    type Err = WarrenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(AgentLifecycle::Active),
            "sleeping" => Ok(AgentLifecycle::Sleeping),
            other => Err(WarrenError::Store(format!("unknown lifecycle '{other}'"))),
        }
    }
}

/// The durable row describing one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub user_id: UserId,
    pub descriptor: AgentDescriptor,
    /// Unique resolution key: the identity key for index-allocated agents, the path otherwise.
    pub descriptor_key: String,
    pub path: AgentPath,
    pub permissions: SessionPermissions,
    pub active_session_id: Option<String>,
    pub lifecycle: AgentLifecycle,
    pub next_sub_index: u64,
    pub next_search_index: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentRecord {
    pub fn new(
        user_id: impl Into<String>,
        descriptor: AgentDescriptor,
        path: AgentPath,
        permissions: SessionPermissions,
    ) -> Self {
        let now = Utc::now();
        let descriptor_key = descriptor
            .identity_key()
            .unwrap_or_else(|| path.to_string());
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            descriptor,
            descriptor_key,
            path,
            permissions,
            active_session_id: None,
            lifecycle: AgentLifecycle::Active,
            next_sub_index: 0,
            next_search_index: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn counter(&self, kind: ChildKind) -> u64 {
        match kind {
            ChildKind::Sub => self.next_sub_index,
            ChildKind::Search => self.next_search_index,
        }
    }

    pub fn is_foreground(&self) -> bool {
        self.descriptor.is_foreground()
    }
}

/// Compare-and-update of one child counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterUpdate {
    pub kind: ChildKind,
    pub expected: u64,
    pub next: u64,
}

/// Partial update of a single agent row. Lifecycle is absent on purpose: it only
/// changes through a state write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentUpdate {
    pub permissions: Option<SessionPermissions>,
    pub active_session_id: Option<Option<String>>,
    pub counter: Option<CounterUpdate>,
}

impl AgentUpdate {
    pub fn permissions(mut self, permissions: SessionPermissions) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn active_session(mut self, session_id: Option<String>) -> Self {
        self.active_session_id = Some(session_id);
        self
    }

    /// Advance `kind`'s counter by one, only if it still equals `expected`.
    pub fn counter_advance(mut self, kind: ChildKind, expected: u64) -> Self {
        self.counter = Some(CounterUpdate {
            kind,
            expected,
            next: expected + 1,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_none() && self.active_session_id.is_none() && self.counter.is_none()
    }
}

/// Who produced a context message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    #[serde(default)]
    pub messages: Vec<ContextMessage>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input += other.input;
        self.output += other.output;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    pub turns: u64,
    pub messages: u64,
}

/// Persisted conversational state of an agent, mutated on every turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    #[serde(default)]
    pub context: AgentContext,
    pub permissions: SessionPermissions,
    #[serde(default)]
    pub tokens: Option<TokenUsage>,
    #[serde(default)]
    pub stats: AgentStats,
    /// Opaque interpreter checkpoint produced by the turn executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    #[serde(default)]
    pub lifecycle: AgentLifecycle,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentState {
    pub fn new(permissions: SessionPermissions) -> Self {
        let now = Utc::now();
        Self {
            context: AgentContext::default(),
            permissions,
            tokens: None,
            stats: AgentStats::default(),
            snapshot: None,
            lifecycle: AgentLifecycle::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Initial state matching a freshly created record.
    pub fn for_record(record: &AgentRecord) -> Self {
        Self {
            permissions: record.permissions.clone(),
            lifecycle: record.lifecycle,
            created_at: record.created_at,
            updated_at: record.updated_at,
            ..Self::new(record.permissions.clone())
        }
    }
}
