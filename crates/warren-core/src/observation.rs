use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Observation type emitted when an agent's persisted lifecycle changes.
pub const AGENT_LIFECYCLE: &str = "agent:lifecycle";

/// A structured event about one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub user_id: String,
    pub agent_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub at: DateTime<Utc>,
}

impl Observation {
    pub fn new(
        user_id: impl Into<String>,
        agent_id: impl Into<String>,
        kind: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            agent_id: agent_id.into(),
            kind: kind.into(),
            data,
            at: Utc::now(),
        }
    }
}

/// Fire-and-forget receiver of observations.
pub trait ObservationSink: Send + Sync {
    fn emit(&self, observation: Observation);
}

/// A broadcast-based bus for in-process observation subscribers.
#[derive(Clone)]
pub struct ObservationBus {
    sender: Arc<broadcast::Sender<Observation>>,
}

impl ObservationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Observation> {
        self.sender.subscribe()
    }
}

impl Default for ObservationBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl ObservationSink for ObservationBus {
    fn emit(&self, observation: Observation) {
        // No subscribers is fine.
        let _ = self.sender.send(observation);
    }
}

/// Forwards each observation to several sinks.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ObservationSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ObservationSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ObservationSink for FanoutSink {
    fn emit(&self, observation: Observation) {
        for sink in &self.sinks {
            sink.emit(observation.clone());
        }
    }
}
