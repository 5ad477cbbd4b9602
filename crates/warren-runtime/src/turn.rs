use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use warren_core::{
    AgentId, AgentRecord, AgentState, HistoryRecord, Result, TokenUsage, ToolCall,
};

use crate::router::{AgentRouter, AgentTarget};

/// One unit of mailbox work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboxItem {
    Message {
        text: String,
    },
    /// Runtime-originated message, e.g. a child reporting back to its parent.
    SystemMessage {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<AgentId>,
    },
    /// Clear the agent's conversational context.
    Reset {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl InboxItem {
    pub fn message(text: impl Into<String>) -> Self {
        InboxItem::Message { text: text.into() }
    }

    pub fn system(text: impl Into<String>, origin: Option<AgentId>) -> Self {
        InboxItem::SystemMessage {
            text: text.into(),
            origin,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            InboxItem::Message { .. } => "message",
            InboxItem::SystemMessage { .. } => "system_message",
            InboxItem::Reset { .. } => "reset",
        }
    }
}

/// Terminal outcome of an awaited post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxResult {
    Reply(String),
    /// The turn finished without a terminal message.
    NoResponse,
}

impl InboxResult {
    pub fn reply(&self) -> Option<&str> {
        match self {
            InboxResult::Reply(text) => Some(text),
            InboxResult::NoResponse => None,
        }
    }
}

/// A tool call made during a turn together with its result.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExchange {
    pub call: ToolCall,
    pub output: String,
    pub is_error: bool,
}

/// What a finished turn hands back to the mailbox worker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutcome {
    pub reply: Option<String>,
    pub tool_calls: Vec<ToolExchange>,
    pub snapshot: Option<String>,
    pub tokens: Option<TokenUsage>,
}

impl TurnOutcome {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            reply: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn silent() -> Self {
        Self::default()
    }
}

/// Everything a turn may look at or call back into.
pub struct TurnContext {
    pub agent: AgentRecord,
    pub state: AgentState,
    pub session_id: String,
    router: AgentRouter,
}

impl TurnContext {
    pub(crate) fn new(
        agent: AgentRecord,
        state: AgentState,
        session_id: String,
        router: AgentRouter,
    ) -> Self {
        Self {
            agent,
            state,
            session_id,
            router,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent.id
    }

    pub fn router(&self) -> &AgentRouter {
        &self.router
    }

    /// Fire-and-forget post on behalf of this agent. Never waits on this agent's own queue.
    pub async fn post(&self, target: AgentTarget, item: InboxItem) -> Result<AgentId> {
        self.router.post_from(&self.agent.id, target, item).await
    }

    /// Reach a human: the parent if there is one, else the most recent foreground agent.
    pub async fn post_to_foreground(&self, item: InboxItem) -> Result<AgentId> {
        self.router.post_to_foreground(&self.agent.id, item).await
    }

    /// Append to this agent's history while the turn is still running.
    pub async fn record(&self, record: HistoryRecord) -> Result<()> {
        self.router
            .store()
            .history_append(&self.agent.id, &record)
            .await
    }
}

/// The inference / tool-execution cycle behind every mailbox.
#[async_trait]
pub trait TurnExecutor: Send + Sync + 'static {
    async fn run_turn(&self, ctx: TurnContext, item: InboxItem) -> Result<TurnOutcome>;
}
