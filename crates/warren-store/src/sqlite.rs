use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use warren_core::{
    AgentPath, AgentRecord, AgentState, AgentStore, AgentUpdate, ChildKind, HistoryRecord,
    Observation, ObservationSink, Result, SessionPermissions, WarrenError,
};

const AGENT_COLUMNS: &str = "id, user_id, path, descriptor_key, descriptor, permissions, \
     active_session_id, lifecycle, next_sub_index, next_search_index, created_at, updated_at";

fn store_err(e: rusqlite::Error) -> WarrenError {
    WarrenError::Store(e.to_string())
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| WarrenError::Store(format!("bad timestamp '{raw}': {e}")))
}

/// Raw column values of one `agents` row.
struct AgentRow {
    id: String,
    user_id: String,
    path: String,
    descriptor_key: String,
    descriptor: String,
    permissions: String,
    active_session_id: Option<String>,
    lifecycle: String,
    next_sub_index: i64,
    next_search_index: i64,
    created_at: String,
    updated_at: String,
}

impl AgentRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            path: row.get(2)?,
            descriptor_key: row.get(3)?,
            descriptor: row.get(4)?,
            permissions: row.get(5)?,
            active_session_id: row.get(6)?,
            lifecycle: row.get(7)?,
            next_sub_index: row.get(8)?,
            next_search_index: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<AgentRecord> {
        Ok(AgentRecord {
            path: AgentPath::parse(self.path)?,
            descriptor: serde_json::from_str(&self.descriptor)?,
            permissions: serde_json::from_str(&self.permissions)?,
            lifecycle: self.lifecycle.parse()?,
            next_sub_index: self.next_sub_index.max(0) as u64,
            next_search_index: self.next_search_index.max(0) as u64,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            id: self.id,
            user_id: self.user_id,
            descriptor_key: self.descriptor_key,
            active_session_id: self.active_session_id,
        })
    }
}

fn counter_column(kind: ChildKind) -> &'static str {
    match kind {
        ChildKind::Sub => "next_sub_index",
        ChildKind::Search => "next_search_index",
    }
}

/// SQLite-backed [`AgentStore`]. One connection, serialized behind a mutex; every
/// write is a single statement (or one transaction) against one agent row.
#[derive(Clone)]
pub struct SqliteAgentStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteAgentStore {
    /// Open or create the agent database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening agent store");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(store_err)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(store_err)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                path TEXT NOT NULL UNIQUE,
                descriptor_key TEXT NOT NULL UNIQUE,
                descriptor TEXT NOT NULL,
                permissions TEXT NOT NULL,
                active_session_id TEXT,
                lifecycle TEXT NOT NULL DEFAULT 'active',
                next_sub_index INTEGER NOT NULL DEFAULT 0,
                next_search_index INTEGER NOT NULL DEFAULT 0,
                state TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_agents_user ON agents(user_id);

            CREATE TABLE IF NOT EXISTS agent_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id TEXT NOT NULL REFERENCES agents(id),
                record_type TEXT NOT NULL,
                record TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_agent ON agent_history(agent_id, id);

            CREATE TABLE IF NOT EXISTS observation_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                type TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_observation_agent ON observation_log(agent_id);
            ",
        )
        .map_err(store_err)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    fn find_one(&self, column: &str, value: &str) -> Result<Option<AgentRecord>> {
        let row = {
            let db = self.db.lock();
            db.query_row(
                &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE {column} = ?1"),
                params![value],
                AgentRow::from_row,
            )
            .optional()
            .map_err(store_err)?
        };
        row.map(AgentRow::into_record).transpose()
    }

    fn find_many(&self, filter: Option<(&str, &str)>) -> Result<Vec<AgentRecord>> {
        let rows = {
            let db = self.db.lock();
            let (sql, values) = match filter {
                Some((column, value)) => (
                    format!("SELECT {AGENT_COLUMNS} FROM agents WHERE {column} = ?1 ORDER BY created_at"),
                    vec![SqlValue::Text(value.to_string())],
                ),
                None => (
                    format!("SELECT {AGENT_COLUMNS} FROM agents ORDER BY created_at"),
                    Vec::new(),
                ),
            };
            let mut stmt = db.prepare(&sql).map_err(store_err)?;
            stmt.query_map(params_from_iter(values.iter()), AgentRow::from_row)
                .map_err(store_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(store_err)?
        };
        rows.into_iter().map(AgentRow::into_record).collect()
    }

    /// Recent observations, newest first, optionally for one agent.
    pub fn observations(&self, agent_id: Option<&str>, limit: usize) -> Result<Vec<Observation>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT user_id, agent_id, type, data, created_at FROM observation_log
                 WHERE ?1 IS NULL OR agent_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![agent_id, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;

        rows.into_iter()
            .map(|(user_id, agent_id, kind, data, created_at)| {
                Ok(Observation {
                    user_id,
                    agent_id,
                    kind,
                    data: serde_json::from_str(&data)?,
                    at: parse_time(&created_at)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl AgentStore for SqliteAgentStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<AgentRecord>> {
        self.find_one("id", id)
    }

    async fn find_by_path(&self, path: &AgentPath) -> Result<Option<AgentRecord>> {
        self.find_one("path", path.as_str())
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<AgentRecord>> {
        self.find_one("descriptor_key", key)
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<AgentRecord>> {
        self.find_many(Some(("user_id", user_id)))
    }

    async fn find_all(&self) -> Result<Vec<AgentRecord>> {
        self.find_many(None)
    }

    async fn create(&self, record: AgentRecord) -> Result<AgentRecord> {
        let descriptor = serde_json::to_string(&record.descriptor)?;
        let permissions = serde_json::to_string(&record.permissions)?;
        let state = serde_json::to_string(&AgentState::for_record(&record))?;
        let inserted = {
            let db = self.db.lock();
            db.execute(
                "INSERT OR IGNORE INTO agents (id, user_id, path, descriptor_key, descriptor, permissions,
                     active_session_id, lifecycle, next_sub_index, next_search_index, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    record.id,
                    record.user_id,
                    record.path.as_str(),
                    record.descriptor_key,
                    descriptor,
                    permissions,
                    record.active_session_id,
                    record.lifecycle.as_str(),
                    record.next_sub_index as i64,
                    record.next_search_index as i64,
                    state,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .map_err(store_err)?
        };

        if inserted == 1 {
            info!(agent_id = %record.id, path = %record.path, "agent created");
            return Ok(record);
        }

        // Someone else owns this identity: hand back their row.
        let existing = match self.find_one("descriptor_key", &record.descriptor_key)? {
            Some(existing) => Some(existing),
            None => self.find_one("path", record.path.as_str())?,
        };
        match existing {
            Some(existing) => {
                debug!(agent_id = %existing.id, path = %existing.path, "agent already exists");
                Ok(existing)
            }
            None => Err(WarrenError::Store(format!(
                "insert of agent {} ignored but no conflicting row found",
                record.id
            ))),
        }
    }

    async fn update(&self, id: &str, update: AgentUpdate) -> Result<bool> {
        let mut sets: Vec<String> = vec!["updated_at = ?1".into()];
        let mut values: Vec<SqlValue> = vec![SqlValue::Text(Utc::now().to_rfc3339())];

        if let Some(permissions) = &update.permissions {
            values.push(SqlValue::Text(serde_json::to_string(permissions)?));
            sets.push(format!("permissions = ?{}", values.len()));
        }
        if let Some(session) = &update.active_session_id {
            values.push(match session {
                Some(s) => SqlValue::Text(s.clone()),
                None => SqlValue::Null,
            });
            sets.push(format!("active_session_id = ?{}", values.len()));
        }

        let mut guard = None;
        if let Some(counter) = update.counter {
            let column = counter_column(counter.kind);
            values.push(SqlValue::Integer(counter.next as i64));
            sets.push(format!("{column} = ?{}", values.len()));
            guard = Some((column, counter.expected));
        }

        values.push(SqlValue::Text(id.to_string()));
        let mut sql = format!(
            "UPDATE agents SET {} WHERE id = ?{}",
            sets.join(", "),
            values.len()
        );
        // Compare-and-set: only advance when nobody else did first.
        if let Some((column, expected)) = guard {
            values.push(SqlValue::Integer(expected as i64));
            sql.push_str(&format!(" AND {column} = ?{}", values.len()));
        }

        let changed = {
            let db = self.db.lock();
            db.execute(&sql, params_from_iter(values.iter()))
                .map_err(store_err)?
        };
        Ok(changed == 1)
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let mut db = self.db.lock();
        let tx = db.transaction().map_err(store_err)?;
        tx.execute("DELETE FROM agent_history WHERE agent_id = ?1", params![id])
            .map_err(store_err)?;
        let removed = tx
            .execute("DELETE FROM agents WHERE id = ?1", params![id])
            .map_err(store_err)?;
        tx.commit().map_err(store_err)?;
        if removed > 0 {
            info!(agent_id = %id, "agent removed");
        }
        Ok(removed > 0)
    }

    async fn state_read(&self, id: &str) -> Result<Option<AgentState>> {
        let row = {
            let db = self.db.lock();
            db.query_row(
                "SELECT state, permissions, lifecycle, created_at, updated_at FROM agents WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(store_err)?
        };
        let Some((state, permissions, lifecycle, created_at, updated_at)) = row else {
            return Ok(None);
        };

        let permissions: SessionPermissions = serde_json::from_str(&permissions)?;
        let mut state = match state {
            Some(raw) => serde_json::from_str::<AgentState>(&raw)?,
            None => AgentState::new(permissions.clone()),
        };
        // Row columns are authoritative for everything they carry.
        state.permissions = permissions;
        state.lifecycle = lifecycle.parse()?;
        state.created_at = parse_time(&created_at)?;
        state.updated_at = parse_time(&updated_at)?;
        Ok(Some(state))
    }

    async fn state_write(&self, id: &str, state: &AgentState) -> Result<()> {
        let raw = serde_json::to_string(state)?;
        // The permissions column is left alone; only `update` replaces it.
        let changed = {
            let db = self.db.lock();
            db.execute(
                "UPDATE agents SET state = ?1, lifecycle = ?2, updated_at = ?3 WHERE id = ?4",
                params![raw, state.lifecycle.as_str(), state.updated_at.to_rfc3339(), id],
            )
            .map_err(store_err)?
        };
        if changed == 0 {
            return Err(WarrenError::AgentNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn history_append(&self, id: &str, record: &HistoryRecord) -> Result<()> {
        let raw = serde_json::to_string(record)?;
        let db = self.db.lock();
        db.execute(
            "INSERT INTO agent_history (agent_id, record_type, record, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, record.type_name(), raw, record.at().to_rfc3339()],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn history_load(&self, id: &str) -> Result<Vec<HistoryRecord>> {
        let rows = {
            let db = self.db.lock();
            let mut stmt = db
                .prepare("SELECT record FROM agent_history WHERE agent_id = ?1 ORDER BY id")
                .map_err(store_err)?;
            stmt.query_map(params![id], |row| row.get::<_, String>(0))
                .map_err(store_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(store_err)?
        };
        rows.iter()
            .map(|raw| serde_json::from_str(raw).map_err(WarrenError::from))
            .collect()
    }
}

impl ObservationSink for SqliteAgentStore {
    fn emit(&self, observation: Observation) {
        let data = observation.data.to_string();
        let db = self.db.lock();
        if let Err(e) = db.execute(
            "INSERT INTO observation_log (user_id, agent_id, type, data, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                observation.user_id,
                observation.agent_id,
                observation.kind,
                data,
                observation.at.to_rfc3339()
            ],
        ) {
            warn!(error = %e, kind = %observation.kind, "failed to persist observation");
        }
    }
}
