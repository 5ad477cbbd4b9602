use chrono::Utc;
use serde_json::json;
use tracing::info;

use warren_core::{
    AGENT_LIFECYCLE, AgentLifecycle, AgentState, AgentStore, Observation, ObservationSink, Result,
    WarrenError,
};

/// The single write path for agent state.
///
/// Permissions and `created_at` always come from what is stored; the caller's copies
/// are ignored. When the persisted lifecycle differs from `state.lifecycle`, exactly
/// one `agent:lifecycle` observation is emitted after the write lands.
pub async fn agent_state_write(
    store: &dyn AgentStore,
    sink: &dyn ObservationSink,
    agent_id: &str,
    mut state: AgentState,
) -> Result<AgentState> {
    let record = store
        .find_by_id(agent_id)
        .await?
        .ok_or_else(|| WarrenError::AgentNotFound(agent_id.to_string()))?;

    state.created_at = match store.state_read(agent_id).await? {
        Some(previous) => previous.created_at,
        None => record.created_at,
    };
    state.permissions = record.permissions.clone();
    state.updated_at = Utc::now();
    store.state_write(agent_id, &state).await?;

    if record.lifecycle != state.lifecycle {
        info!(
            agent_id,
            user_id = %record.user_id,
            from = %record.lifecycle,
            to = %state.lifecycle,
            "agent lifecycle changed"
        );
        sink.emit(Observation::new(
            &record.user_id,
            agent_id,
            AGENT_LIFECYCLE,
            json!({
                "agentId": agent_id,
                "userId": record.user_id,
                "lifecycle": state.lifecycle,
                "label": record.descriptor.label(),
            }),
        ));
    }
    Ok(state)
}

/// Move an agent to `lifecycle`, keeping the rest of its state.
pub async fn agent_lifecycle_set(
    store: &dyn AgentStore,
    sink: &dyn ObservationSink,
    agent_id: &str,
    lifecycle: AgentLifecycle,
) -> Result<AgentState> {
    let mut state = store
        .state_read(agent_id)
        .await?
        .ok_or_else(|| WarrenError::AgentNotFound(agent_id.to_string()))?;
    state.lifecycle = lifecycle;
    agent_state_write(store, sink, agent_id, state).await
}
