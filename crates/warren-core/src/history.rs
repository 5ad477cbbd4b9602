use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// A request from the turn executor to call a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Why a tool call was closed without ever producing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingReason {
    SessionCrashed,
    UserAborted,
}

impl PendingReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingReason::SessionCrashed => "session_crashed",
            PendingReason::UserAborted => "user_aborted",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            PendingReason::SessionCrashed => {
                "Tool call did not complete: the session crashed before a result was recorded."
            }
            PendingReason::UserAborted => {
                "Tool call did not complete: the user aborted the turn."
            }
        }
    }
}

impl fmt::Display for PendingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of an agent's durable history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryRecord {
    Start {
        at: DateTime<Utc>,
    },
    /// Context was cleared; earlier records no longer take part in the conversation.
    Reset {
        at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    UserMessage {
        at: DateTime<Utc>,
        text: String,
    },
    AssistantMessage {
        at: DateTime<Utc>,
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        at: DateTime<Utc>,
        tool_call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<PendingReason>,
    },
    Note {
        at: DateTime<Utc>,
        text: String,
    },
}

impl HistoryRecord {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            HistoryRecord::Start { at }
            | HistoryRecord::Reset { at, .. }
            | HistoryRecord::UserMessage { at, .. }
            | HistoryRecord::AssistantMessage { at, .. }
            | HistoryRecord::ToolResult { at, .. }
            | HistoryRecord::Note { at, .. } => *at,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            HistoryRecord::Start { .. } => "start",
            HistoryRecord::Reset { .. } => "reset",
            HistoryRecord::UserMessage { .. } => "user_message",
            HistoryRecord::AssistantMessage { .. } => "assistant_message",
            HistoryRecord::ToolResult { .. } => "tool_result",
            HistoryRecord::Note { .. } => "note",
        }
    }
}

/// Tool calls issued since the last reset that never received a result.
pub fn pending_tool_calls(records: &[HistoryRecord]) -> Vec<&ToolCall> {
    let start = records
        .iter()
        .rposition(|r| matches!(r, HistoryRecord::Reset { .. }))
        .map(|i| i + 1)
        .unwrap_or(0);
    let window = &records[start..];

    let resolved: HashSet<&str> = window
        .iter()
        .filter_map(|r| match r {
            HistoryRecord::ToolResult { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
        .collect();

    window
        .iter()
        .filter_map(|r| match r {
            HistoryRecord::AssistantMessage { tool_calls, .. } => Some(tool_calls),
            _ => None,
        })
        .flatten()
        .filter(|call| !resolved.contains(call.id.as_str()))
        .collect()
}

/// Terminal error results closing every pending tool call, in issue order.
pub fn pending_tool_results(
    records: &[HistoryRecord],
    reason: PendingReason,
    at: DateTime<Utc>,
) -> Vec<HistoryRecord> {
    pending_tool_calls(records)
        .into_iter()
        .map(|call| HistoryRecord::ToolResult {
            at,
            tool_call_id: call.id.clone(),
            tool_name: call.tool_name.clone(),
            output: reason.message().to_string(),
            is_error: true,
            reason: Some(reason),
        })
        .collect()
}
