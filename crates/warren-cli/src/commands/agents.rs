use serde_json::json;

use warren_config::WarrenConfig;
use warren_core::{
    AgentLifecycle, AgentRecord, AgentStore, HistoryRecord, Result, WarrenError,
    pending_tool_calls,
};

use super::{open_store, truncate_output};

fn lifecycle_marker(lifecycle: AgentLifecycle) -> &'static str {
    match lifecycle {
        AgentLifecycle::Active => "\x1b[32m●\x1b[0m",
        AgentLifecycle::Sleeping => "\x1b[90m○\x1b[0m",
    }
}

pub(super) async fn cmd_agents(
    config: WarrenConfig,
    user: Option<String>,
    json: bool,
) -> Result<()> {
    let store = open_store(&config)?;
    let mut agents = match &user {
        Some(user_id) => store.find_by_user(user_id).await?,
        None => store.find_all().await?,
    };
    agents.sort_by(|a, b| a.path.cmp(&b.path));

    if json {
        println!("{}", serde_json::to_string_pretty(&agents)?);
        return Ok(());
    }

    if agents.is_empty() {
        println!(
            "No agents{}.",
            user.as_ref()
                .map(|u| format!(" for user '{u}'"))
                .unwrap_or_default()
        );
        return Ok(());
    }

    println!("\x1b[1mAgents\x1b[0m ({})", agents.len());
    println!("{}", "-".repeat(80));
    for agent in &agents {
        println!(
            "{} {:<36}  {}  \x1b[36m{}\x1b[0m",
            lifecycle_marker(agent.lifecycle),
            agent.id,
            agent.path,
            agent.descriptor.type_name(),
        );
    }
    Ok(())
}

pub(super) async fn cmd_agent(
    config: WarrenConfig,
    id: String,
    limit: usize,
    json: bool,
) -> Result<()> {
    let store = open_store(&config)?;
    let agent = store
        .find_by_id(&id)
        .await?
        .ok_or_else(|| WarrenError::AgentNotFound(id.clone()))?;
    let state = store.state_read(&id).await?;
    let history = store.history_load(&id).await?;
    let pending: Vec<_> = pending_tool_calls(&history).into_iter().cloned().collect();
    let recent = &history[history.len().saturating_sub(limit)..];

    if json {
        let value = json!({
            "agent": agent,
            "state": state,
            "history": recent,
            "pendingToolCalls": pending,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    print_record(&agent);
    if let Some(state) = &state {
        println!(
            "  Turns:       {} ({} messages)",
            state.stats.turns, state.stats.messages
        );
        if let Some(tokens) = state.tokens {
            println!(
                "  Tokens:      {} in / {} out",
                tokens.input, tokens.output
            );
        }
    }

    println!();
    println!(
        "\x1b[1mHistory\x1b[0m ({} of {} records)",
        recent.len(),
        history.len()
    );
    for record in recent {
        println!(
            "  \x1b[90m{}\x1b[0m  {:<17}  {}",
            record.at().format("%Y-%m-%d %H:%M:%S"),
            record.type_name(),
            truncate_output(&history_summary(record), 100)
        );
    }

    if !pending.is_empty() {
        println!();
        println!("\x1b[33m⚠ {} pending tool call(s)\x1b[0m", pending.len());
        for call in &pending {
            println!("  {}  {}", call.id, call.tool_name);
        }
    }
    Ok(())
}

fn print_record(agent: &AgentRecord) {
    println!("\x1b[1m{}\x1b[0m  {}", agent.descriptor.label(), agent.id);
    println!(
        "  Lifecycle:   {} {}",
        lifecycle_marker(agent.lifecycle),
        agent.lifecycle
    );
    println!("  Path:        {}", agent.path);
    println!("  User:        {}", agent.user_id);
    println!("  Type:        {}", agent.descriptor.type_name());
    if let Some(session) = &agent.active_session_id {
        println!("  Session:     {session}");
    }
    println!(
        "  Workspace:   {}",
        agent.permissions.working_dir.display()
    );
    println!(
        "  Capabilities: network={} events={} write_dirs={} read_dirs={}",
        agent.permissions.network,
        agent.permissions.events,
        agent.permissions.write_dirs.len(),
        agent.permissions.read_dirs.len()
    );
    println!(
        "  Children:    sub={} search={}",
        agent.next_sub_index, agent.next_search_index
    );
    println!(
        "  Updated:     {}",
        agent.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
}

fn history_summary(record: &HistoryRecord) -> String {
    match record {
        HistoryRecord::Start { .. } => String::new(),
        HistoryRecord::Reset { message, .. } => message.clone().unwrap_or_default(),
        HistoryRecord::UserMessage { text, .. } | HistoryRecord::Note { text, .. } => {
            text.clone()
        }
        HistoryRecord::AssistantMessage {
            text, tool_calls, ..
        } => {
            if tool_calls.is_empty() {
                text.clone()
            } else {
                let names: Vec<&str> = tool_calls.iter().map(|c| c.tool_name.as_str()).collect();
                format!("calls: {}", names.join(", "))
            }
        }
        HistoryRecord::ToolResult {
            tool_name,
            output,
            is_error,
            ..
        } => {
            let status = if *is_error { "error" } else { "ok" };
            format!("{tool_name} [{status}] {output}")
        }
    }
}

pub(super) fn cmd_logs(
    config: WarrenConfig,
    limit: usize,
    agent: Option<String>,
    json: bool,
) -> Result<()> {
    let store = open_store(&config)?;
    let entries = store.observations(agent.as_deref(), limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!(
            "No observations{}.",
            agent
                .as_ref()
                .map(|a| format!(" for agent '{a}'"))
                .unwrap_or_default()
        );
        return Ok(());
    }

    println!("\x1b[1mObservations\x1b[0m ({} entries)", entries.len());
    println!("{}", "-".repeat(80));
    for entry in &entries {
        let color = match entry.data["lifecycle"].as_str() {
            Some("sleeping") => "\x1b[90m",
            Some("active") => "\x1b[32m",
            _ => "\x1b[37m",
        };
        println!(
            "\x1b[90m{}\x1b[0m  {}{}\x1b[0m  {}",
            entry.at.format("%Y-%m-%d %H:%M:%S"),
            color,
            entry.kind,
            entry.agent_id
        );
        println!(
            "   \x1b[90m{}\x1b[0m",
            truncate_output(&entry.data.to_string(), 120)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use warren_core::ToolCall;

    #[test]
    fn test_history_summary_lists_tool_names() {
        let record = HistoryRecord::AssistantMessage {
            at: Utc::now(),
            text: String::new(),
            tool_calls: vec![ToolCall {
                id: "c1".into(),
                tool_name: "read_file".into(),
                arguments: serde_json::Value::Null,
            }],
        };
        assert_eq!(history_summary(&record), "calls: read_file");
    }
}
