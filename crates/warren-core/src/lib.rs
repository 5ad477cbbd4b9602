//! # warren-core
//!
//! Core types, traits, and primitives for the Warren agent runtime.
//! This crate defines the shared vocabulary used by every other crate in the workspace:
//! agent paths and descriptors, capability sets, agent records and history, and the
//! store and observation seams.

pub mod agent;
pub mod descriptor;
pub mod error;
pub mod history;
pub mod observation;
pub mod path;
pub mod permissions;
pub mod store;

pub use agent::{
    AgentContext, AgentId, AgentLifecycle, AgentRecord, AgentState, AgentStats, AgentUpdate,
    ContextMessage, CounterUpdate, Role, TokenUsage, UserId,
};
pub use descriptor::{AgentDescriptor, PathContext, path_from_descriptor};
pub use error::{Result, WarrenError};
pub use history::{HistoryRecord, PendingReason, ToolCall, pending_tool_calls, pending_tool_results};
pub use observation::{AGENT_LIFECYCLE, FanoutSink, Observation, ObservationBus, ObservationSink};
pub use path::{AgentPath, ChildKind, PathKind, path_kind, path_parent, path_user_id, segment_require};
pub use permissions::{Access, SessionPermissions};
pub use store::AgentStore;
