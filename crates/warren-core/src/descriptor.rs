use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, WarrenError};
use crate::path::{AgentPath, ChildKind, PathKind};

/// Why an agent exists. Immutable once the agent is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AgentDescriptor {
    /// A human talking through a connector.
    User {
        connector: String,
        channel_id: String,
        external_user_id: String,
    },
    Cron {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Task {
        id: String,
    },
    /// A named, long-lived agent.
    Permanent {
        id: String,
        name: String,
        description: String,
        system_prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_dir: Option<PathBuf>,
    },
    Subagent {
        id: String,
        parent_agent_id: String,
        name: String,
    },
    MemoryAgent {
        id: String,
    },
    MemorySearch {
        id: String,
        parent_agent_id: String,
        name: String,
    },
    /// Gateway agent for a sub-user.
    Subuser {
        id: String,
        name: String,
        system_prompt: String,
    },
    /// A sandboxed third-party app spawned by another agent.
    App {
        id: String,
        parent_agent_id: String,
        app_id: String,
        system_prompt: String,
    },
    Swarm {
        id: String,
    },
    System {
        tag: String,
    },
}

/// Context needed to place a descriptor in the path hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathContext {
    pub user_id: String,
    pub parent_path: Option<AgentPath>,
    pub sub_index: Option<u64>,
    pub search_index: Option<u64>,
}

impl PathContext {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent_path: AgentPath) -> Self {
        self.parent_path = Some(parent_path);
        self
    }

    pub fn with_sub_index(mut self, index: u64) -> Self {
        self.sub_index = Some(index);
        self
    }

    pub fn with_search_index(mut self, index: u64) -> Self {
        self.search_index = Some(index);
        self
    }

    /// Attach an allocated child path: its parent and its index.
    pub fn with_allocated(mut self, child: &AgentPath) -> Self {
        self.parent_path = child.parent();
        match child.kind() {
            PathKind::Sub => self.sub_index = child.child_index(),
            PathKind::Search => self.search_index = child.child_index(),
            _ => {}
        }
        self
    }
}

impl AgentDescriptor {
    /// The tag used on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            AgentDescriptor::User { .. } => "user",
            AgentDescriptor::Cron { .. } => "cron",
            AgentDescriptor::Task { .. } => "task",
            AgentDescriptor::Permanent { .. } => "permanent",
            AgentDescriptor::Subagent { .. } => "subagent",
            AgentDescriptor::MemoryAgent { .. } => "memory-agent",
            AgentDescriptor::MemorySearch { .. } => "memory-search",
            AgentDescriptor::Subuser { .. } => "subuser",
            AgentDescriptor::App { .. } => "app",
            AgentDescriptor::Swarm { .. } => "swarm",
            AgentDescriptor::System { .. } => "system",
        }
    }

    /// The path kind every path built from this descriptor classifies as.
    pub fn kind(&self) -> PathKind {
        match self {
            AgentDescriptor::User { .. } => PathKind::Connector,
            AgentDescriptor::Cron { .. } => PathKind::Cron,
            AgentDescriptor::Task { .. } => PathKind::Task,
            AgentDescriptor::Permanent { .. } | AgentDescriptor::Swarm { .. } => PathKind::Agent,
            AgentDescriptor::Subagent { .. } | AgentDescriptor::App { .. } => PathKind::Sub,
            AgentDescriptor::MemoryAgent { .. } => PathKind::Memory,
            AgentDescriptor::MemorySearch { .. } => PathKind::Search,
            AgentDescriptor::Subuser { .. } => PathKind::Subuser,
            AgentDescriptor::System { .. } => PathKind::System,
        }
    }

    /// Agents that face a human directly.
    pub fn is_foreground(&self) -> bool {
        matches!(
            self,
            AgentDescriptor::User { .. }
                | AgentDescriptor::Swarm { .. }
                | AgentDescriptor::Permanent { .. }
        )
    }

    pub fn parent_agent_id(&self) -> Option<&str> {
        match self {
            AgentDescriptor::Subagent { parent_agent_id, .. }
            | AgentDescriptor::MemorySearch { parent_agent_id, .. }
            | AgentDescriptor::App { parent_agent_id, .. } => Some(parent_agent_id.as_str()),
            _ => None,
        }
    }

    pub fn app_id(&self) -> Option<&str> {
        match self {
            AgentDescriptor::App { app_id, .. } => Some(app_id.as_str()),
            _ => None,
        }
    }

    /// Counter a new agent of this type draws its index from, if any.
    pub fn child_kind(&self) -> Option<ChildKind> {
        match self {
            AgentDescriptor::Subagent { .. } | AgentDescriptor::App { .. } => Some(ChildKind::Sub),
            AgentDescriptor::MemorySearch { .. } => Some(ChildKind::Search),
            _ => None,
        }
    }

    /// Stable key for index-allocated agents, whose path is not known before allocation.
    pub fn identity_key(&self) -> Option<String> {
        match self {
            AgentDescriptor::Subagent { id, parent_agent_id, .. }
            | AgentDescriptor::MemorySearch { id, parent_agent_id, .. }
            | AgentDescriptor::App { id, parent_agent_id, .. } => {
                Some(format!("{}:{}:{}", self.type_name(), parent_agent_id, id))
            }
            _ => None,
        }
    }

    /// Short human label attached to lifecycle observations.
    pub fn label(&self) -> String {
        match self {
            AgentDescriptor::User { connector, .. } => connector.clone(),
            AgentDescriptor::Cron { name, .. } => name.clone().unwrap_or_else(|| "cron".into()),
            AgentDescriptor::Task { .. } => "task".into(),
            AgentDescriptor::Permanent { name, .. }
            | AgentDescriptor::Subagent { name, .. }
            | AgentDescriptor::MemorySearch { name, .. }
            | AgentDescriptor::Subuser { name, .. } => name.clone(),
            AgentDescriptor::MemoryAgent { .. } => "memory-agent".into(),
            AgentDescriptor::App { app_id, .. } => app_id.clone(),
            AgentDescriptor::Swarm { .. } => "swarm".into(),
            AgentDescriptor::System { tag } => tag.clone(),
        }
    }

    /// Reject descriptors with missing identifying fields.
    pub fn validate(&self) -> Result<()> {
        let required: Vec<(&str, &str)> = match self {
            AgentDescriptor::User { connector, channel_id, external_user_id } => vec![
                ("connector", connector.as_str()),
                ("channel_id", channel_id.as_str()),
                ("external_user_id", external_user_id.as_str()),
            ],
            AgentDescriptor::Cron { id, .. }
            | AgentDescriptor::Task { id }
            | AgentDescriptor::MemoryAgent { id }
            | AgentDescriptor::Swarm { id } => vec![("id", id.as_str())],
            AgentDescriptor::Permanent { id, name, .. }
            | AgentDescriptor::Subuser { id, name, .. } => vec![("id", id.as_str()), ("name", name.as_str())],
            AgentDescriptor::Subagent { id, parent_agent_id, name }
            | AgentDescriptor::MemorySearch { id, parent_agent_id, name } => vec![
                ("id", id.as_str()),
                ("parent_agent_id", parent_agent_id.as_str()),
                ("name", name.as_str()),
            ],
            AgentDescriptor::App { id, parent_agent_id, app_id, .. } => vec![
                ("id", id.as_str()),
                ("parent_agent_id", parent_agent_id.as_str()),
                ("app_id", app_id.as_str()),
            ],
            AgentDescriptor::System { tag } => vec![("tag", tag.as_str())],
        };
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(WarrenError::InvalidDescriptor(format!(
                    "{} descriptor is missing '{field}'",
                    self.type_name()
                )));
            }
        }
        Ok(())
    }
}

fn indexed_path(
    ctx: &PathContext,
    index: Option<u64>,
    kind: ChildKind,
    parent_agent_id: &str,
    id: &str,
) -> Result<AgentPath> {
    match (&ctx.parent_path, index) {
        (Some(parent), Some(index)) => Ok(parent.child(kind, index)),
        (Some(parent), None) => Err(WarrenError::InvalidDescriptor(format!(
            "parent path {parent} given without an allocated {kind} index"
        ))),
        // No parent context: id-based synthetic path under the parent agent id.
        (None, _) => AgentPath::agent(&ctx.user_id, parent_agent_id)?.child_named(kind, id),
    }
}

/// Map a descriptor to its canonical path.
pub fn path_from_descriptor(descriptor: &AgentDescriptor, ctx: &PathContext) -> Result<AgentPath> {
    descriptor.validate()?;
    let user_id = ctx.user_id.as_str();
    match descriptor {
        AgentDescriptor::User { connector, .. } => AgentPath::connector(user_id, connector),
        AgentDescriptor::Cron { id, .. } => AgentPath::cron(user_id, id),
        AgentDescriptor::Task { id } => AgentPath::task(user_id, id),
        AgentDescriptor::Permanent { name, .. } => AgentPath::agent(user_id, name),
        AgentDescriptor::Subuser { id, .. } => AgentPath::subuser(user_id, id),
        AgentDescriptor::Swarm { .. } => AgentPath::agent(user_id, "swarm"),
        AgentDescriptor::System { tag } => AgentPath::system(tag),
        AgentDescriptor::MemoryAgent { id } => match &ctx.parent_path {
            Some(parent) => Ok(parent.memory()),
            None => Ok(AgentPath::agent(user_id, id)?.memory()),
        },
        AgentDescriptor::Subagent { id, parent_agent_id, .. }
        | AgentDescriptor::App { id, parent_agent_id, .. } => {
            indexed_path(ctx, ctx.sub_index, ChildKind::Sub, parent_agent_id, id)
        }
        AgentDescriptor::MemorySearch { id, parent_agent_id, .. } => {
            indexed_path(ctx, ctx.search_index, ChildKind::Search, parent_agent_id, id)
        }
    }
}
