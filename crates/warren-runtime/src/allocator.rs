use std::time::Duration;

use tracing::debug;
use warren_core::{AgentPath, AgentStore, AgentUpdate, ChildKind, Result};

/// Spins before the first sleep.
const SPIN_ATTEMPTS: u32 = 3;
const MAX_BACKOFF: Duration = Duration::from_millis(5);

/// Issue the next child path of `kind` under `parent_agent_id`.
///
/// Reads the parent's counter and advances it with a compare-and-set. A lost race
/// re-reads and tries again, so concurrent callers always receive distinct,
/// gap-free indices. A parent without a stored row yields
/// `/runtime/agent/<parent_agent_id>/<kind>/0`.
pub async fn allocate_child_path(
    store: &dyn AgentStore,
    parent_agent_id: &str,
    kind: ChildKind,
) -> Result<AgentPath> {
    let mut attempt: u32 = 0;
    loop {
        let Some(parent) = store.find_by_id(parent_agent_id).await? else {
            debug!(
                parent_agent_id,
                kind = kind.as_str(),
                "parent not stored, using runtime path"
            );
            return AgentPath::runtime_fallback(parent_agent_id, kind);
        };

        let index = parent.counter(kind);
        let update = AgentUpdate::default().counter_advance(kind, index);
        if store.update(&parent.id, update).await? {
            let path = parent.path.child(kind, index);
            debug!(parent_agent_id, path = %path, attempt, "child path allocated");
            return Ok(path);
        }

        attempt += 1;
        debug!(parent_agent_id, index, attempt, "child counter contended, retrying");
        backoff(attempt).await;
    }
}

async fn backoff(attempt: u32) {
    if attempt <= SPIN_ATTEMPTS {
        tokio::task::yield_now().await;
        return;
    }
    let exp = (attempt - SPIN_ATTEMPTS).min(8);
    let delay = Duration::from_micros(20u64 << exp).min(MAX_BACKOFF);
    tokio::time::sleep(delay).await;
}
