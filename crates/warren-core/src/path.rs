use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, WarrenError};

/// Segment keywords with a fixed meaning in the second position or as a child suffix.
const RESERVED: &[&str] = &["agent", "cron", "task", "subuser", "sub", "search", "memory"];

/// Scope used for system-owned agents.
pub const SYSTEM_SCOPE: &str = "system";

/// Scope used for synthetic paths of agents without a durable row.
pub const RUNTIME_SCOPE: &str = "runtime";

/// The shape of an agent path, recovered from its segments alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    Connector,
    Agent,
    Cron,
    Task,
    Subuser,
    Sub,
    Memory,
    Search,
    System,
}

impl PathKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathKind::Connector => "connector",
            PathKind::Agent => "agent",
            PathKind::Cron => "cron",
            PathKind::Task => "task",
            PathKind::Subuser => "subuser",
            PathKind::Sub => "sub",
            PathKind::Memory => "memory",
            PathKind::Search => "search",
            PathKind::System => "system",
        }
    }

    /// Kinds that live under another agent's path.
    pub fn is_child(&self) -> bool {
        matches!(self, PathKind::Sub | PathKind::Memory | PathKind::Search)
    }
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PathKind {
    type Err = WarrenError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "connector" => PathKind::Connector,
            "agent" => PathKind::Agent,
            "cron" => PathKind::Cron,
            "task" => PathKind::Task,
            "subuser" => PathKind::Subuser,
            "sub" => PathKind::Sub,
            "memory" => PathKind::Memory,
            "search" => PathKind::Search,
            "system" => PathKind::System,
            other => return Err(WarrenError::UnknownPathPattern(format!("kind '{other}'"))),
        })
    }
}

/// Index-allocated child kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildKind {
    Sub,
    Search,
}

impl ChildKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildKind::Sub => "sub",
            ChildKind::Search => "search",
        }
    }
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate a single path segment: non-empty and free of `/`.
pub fn segment_require<'a>(value: &'a str, label: &str) -> Result<&'a str> {
    if value.is_empty() {
        return Err(WarrenError::InvalidSegment {
            label: label.to_string(),
            reason: "segment is empty".into(),
        });
    }
    if value.contains('/') {
        return Err(WarrenError::InvalidSegment {
            label: label.to_string(),
            reason: format!("segment '{value}' contains '/'"),
        });
    }
    Ok(value)
}

fn user_segment<'a>(user_id: &'a str) -> Result<&'a str> {
    let user_id = segment_require(user_id, "user id")?;
    if user_id == SYSTEM_SCOPE {
        return Err(WarrenError::InvalidSegment {
            label: "user id".into(),
            reason: "'system' is reserved".into(),
        });
    }
    Ok(user_id)
}

fn split(raw: &str) -> Result<Vec<&str>> {
    let rest = raw
        .strip_prefix('/')
        .ok_or_else(|| WarrenError::UnknownPathPattern(raw.to_string()))?;
    let segments: Vec<&str> = rest.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(WarrenError::UnknownPathPattern(raw.to_string()));
    }
    Ok(segments)
}

fn classify(raw: &str, segments: &[&str]) -> Result<PathKind> {
    let unknown = || WarrenError::UnknownPathPattern(raw.to_string());
    let n = segments.len();
    if n < 2 {
        return Err(unknown());
    }

    // Child suffixes first; the remaining prefix must itself be a valid path.
    if segments[n - 1] == "memory" && n >= 3 {
        classify(raw, &segments[..n - 1])?;
        return Ok(PathKind::Memory);
    }
    if n >= 4 && segments[n - 2] == "search" {
        classify(raw, &segments[..n - 2])?;
        return Ok(PathKind::Search);
    }
    if n >= 4 && segments[n - 2] == "sub" {
        classify(raw, &segments[..n - 2])?;
        return Ok(PathKind::Sub);
    }

    if segments[0] == SYSTEM_SCOPE {
        return if n == 2 { Ok(PathKind::System) } else { Err(unknown()) };
    }

    let kind = match segments[1] {
        "agent" => PathKind::Agent,
        "cron" => PathKind::Cron,
        "task" => PathKind::Task,
        "subuser" => PathKind::Subuser,
        reserved if RESERVED.contains(&reserved) => return Err(unknown()),
        _ => {
            return if n == 2 { Ok(PathKind::Connector) } else { Err(unknown()) };
        }
    };
    if n == 3 { Ok(kind) } else { Err(unknown()) }
}

/// Classify a raw path string. Fails for anything outside the known shapes.
pub fn path_kind(raw: &str) -> Result<PathKind> {
    let segments = split(raw)?;
    classify(raw, &segments)
}

/// Canonical, validated identity of an agent instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentPath(String);

impl AgentPath {
    /// Parse and validate a raw path.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        path_kind(&raw)?;
        Ok(Self(raw))
    }

    /// `/<userId>/<connector>`
    pub fn connector(user_id: &str, connector: &str) -> Result<Self> {
        let user_id = user_segment(user_id)?;
        let connector = segment_require(connector, "connector")?;
        if RESERVED.contains(&connector) {
            return Err(WarrenError::InvalidSegment {
                label: "connector".into(),
                reason: format!("'{connector}' is a reserved keyword"),
            });
        }
        Ok(Self(format!("/{user_id}/{connector}")))
    }

    /// `/<userId>/agent/<name>`
    pub fn agent(user_id: &str, name: &str) -> Result<Self> {
        Self::scoped(user_id, "agent", name, "agent name")
    }

    /// `/<userId>/cron/<id>`
    pub fn cron(user_id: &str, id: &str) -> Result<Self> {
        Self::scoped(user_id, "cron", id, "cron id")
    }

    /// `/<userId>/task/<id>`
    pub fn task(user_id: &str, id: &str) -> Result<Self> {
        Self::scoped(user_id, "task", id, "task id")
    }

    /// `/<userId>/subuser/<id>`
    pub fn subuser(user_id: &str, id: &str) -> Result<Self> {
        Self::scoped(user_id, "subuser", id, "subuser id")
    }

    /// `/system/<tag>`
    pub fn system(tag: &str) -> Result<Self> {
        let tag = segment_require(tag, "system tag")?;
        Ok(Self(format!("/{SYSTEM_SCOPE}/{tag}")))
    }

    /// `/runtime/agent/<parentAgentId>/<kind>/0`, used when the parent has no durable row.
    pub fn runtime_fallback(parent_agent_id: &str, kind: ChildKind) -> Result<Self> {
        let parent = segment_require(parent_agent_id, "parent agent id")?;
        Ok(Self(format!("/{RUNTIME_SCOPE}/agent/{parent}/{kind}/0")))
    }

    fn scoped(user_id: &str, keyword: &str, value: &str, label: &str) -> Result<Self> {
        let user_id = user_segment(user_id)?;
        let value = segment_require(value, label)?;
        Ok(Self(format!("/{user_id}/{keyword}/{value}")))
    }

    /// `<self>/sub/<index>`
    pub fn sub(&self, index: u64) -> Self {
        self.child(ChildKind::Sub, index)
    }

    /// `<self>/search/<index>`
    pub fn search(&self, index: u64) -> Self {
        self.child(ChildKind::Search, index)
    }

    pub fn child(&self, kind: ChildKind, index: u64) -> Self {
        Self(format!("{}/{}/{}", self.0, kind, index))
    }

    /// Child with a non-numeric discriminator (id-based fallback paths).
    pub fn child_named(&self, kind: ChildKind, name: &str) -> Result<Self> {
        let name = segment_require(name, "child id")?;
        Ok(Self(format!("{}/{}/{}", self.0, kind, name)))
    }

    /// `<self>/memory`
    pub fn memory(&self) -> Self {
        Self(format!("{}/memory", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0[1..].split('/')
    }

    pub fn kind(&self) -> PathKind {
        // Construction guarantees classification; Connector is unreachable in practice.
        path_kind(&self.0).unwrap_or(PathKind::Connector)
    }

    /// The owning agent's path for child kinds; `None` for root-level kinds.
    pub fn parent(&self) -> Option<AgentPath> {
        let strip = match self.kind() {
            PathKind::Sub | PathKind::Search => 2,
            PathKind::Memory => 1,
            _ => return None,
        };
        let segments: Vec<&str> = self.segments().collect();
        let keep = segments.len().checked_sub(strip)?;
        Some(Self(format!("/{}", segments[..keep].join("/"))))
    }

    /// Owning user id; `None` only for system paths.
    pub fn user_id(&self) -> Option<&str> {
        let first = self.segments().next()?;
        if first == SYSTEM_SCOPE { None } else { Some(first) }
    }

    /// Trailing index for index-allocated children.
    pub fn child_index(&self) -> Option<u64> {
        match self.kind() {
            PathKind::Sub | PathKind::Search => self.segments().last()?.parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for AgentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AgentPath {
    type Err = WarrenError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AgentPath {
    type Error = WarrenError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<AgentPath> for String {
    fn from(path: AgentPath) -> Self {
        path.0
    }
}

impl AsRef<str> for AgentPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Parent of a raw path; `None` for root-level kinds.
pub fn path_parent(raw: &str) -> Result<Option<AgentPath>> {
    Ok(AgentPath::parse(raw)?.parent())
}

/// Owning user of a raw path; `None` for system paths.
pub fn path_user_id(raw: &str) -> Result<Option<String>> {
    Ok(AgentPath::parse(raw)?.user_id().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_rejects_relative_and_empty() {
        assert!(split("user/telegram").is_err());
        assert!(split("/user//telegram").is_err());
        assert!(split("/user/telegram/").is_err());
        assert_eq!(split("/user/telegram").unwrap(), vec!["user", "telegram"]);
    }

    #[test]
    fn test_child_of_invalid_prefix_is_rejected() {
        assert!(path_kind("/u/agent/sub/0").is_err());
        assert!(path_kind("/u/sub/0").is_err());
        assert!(path_kind("/u/memory").is_err());
    }
}
