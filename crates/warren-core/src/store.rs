use async_trait::async_trait;

use crate::agent::{AgentRecord, AgentState, AgentUpdate};
use crate::error::Result;
use crate::history::HistoryRecord;
use crate::path::AgentPath;

/// Durable storage for agent rows, their state, and their history.
///
/// Every write touches exactly one agent row and is atomic for that row.
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<AgentRecord>>;

    async fn find_by_path(&self, path: &AgentPath) -> Result<Option<AgentRecord>>;

    /// Lookup by [`AgentRecord::descriptor_key`].
    async fn find_by_key(&self, key: &str) -> Result<Option<AgentRecord>>;

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<AgentRecord>>;

    async fn find_all(&self) -> Result<Vec<AgentRecord>>;

    /// Find-or-create. Inserts `record` unless another row already owns its path or
    /// descriptor key, and returns whichever row owns the identity afterwards.
    async fn create(&self, record: AgentRecord) -> Result<AgentRecord>;

    /// Apply a partial update. Returns `false` when the row is missing or a
    /// counter's expected value no longer matches, in which case nothing changed.
    async fn update(&self, id: &str, update: AgentUpdate) -> Result<bool>;

    /// Delete the row with its state and history.
    async fn remove(&self, id: &str) -> Result<bool>;

    async fn state_read(&self, id: &str) -> Result<Option<AgentState>>;

    /// Persist state. Also the only way the row's lifecycle changes.
    ///
    /// `state.permissions` is not written; the stored set changes only through
    /// [`AgentUpdate::permissions`] and is overlaid again by `state_read`.
    async fn state_write(&self, id: &str, state: &AgentState) -> Result<()>;

    async fn history_append(&self, id: &str, record: &HistoryRecord) -> Result<()>;

    async fn history_load(&self, id: &str) -> Result<Vec<HistoryRecord>>;
}
