//! # warren-runtime
//!
//! The agent runtime: turns descriptors into durable agents and routes work to them.
//!
//! ```text
//!   post / post_and_await
//!            │
//!            ▼
//!   ┌──────────────────┐   resolve / materialize   ┌────────────┐
//!   │   AgentRouter    │ ────────────────────────▶ │ AgentStore │
//!   └────────┬─────────┘   allocate child paths    └────────────┘
//!            │ one bounded queue per agent
//!            ▼
//!   ┌──────────────────┐   run_turn    ┌──────────────┐
//!   │  mailbox worker  │ ────────────▶ │ TurnExecutor │
//!   └────────┬─────────┘               └──────────────┘
//!            │ state writes
//!            ▼
//!   agent_state_write ──▶ agent:lifecycle observations
//! ```

pub mod allocator;
pub mod lifecycle;
pub(crate) mod mailbox;
pub mod router;
pub mod turn;

pub use allocator::allocate_child_path;
pub use lifecycle::{agent_lifecycle_set, agent_state_write};
pub use router::{AgentRouter, AgentRouterBuilder, AgentTarget, agent_sandbox};
pub use turn::{InboxItem, InboxResult, ToolExchange, TurnContext, TurnExecutor, TurnOutcome};
pub use warren_sandbox::access_allows as check_access;
