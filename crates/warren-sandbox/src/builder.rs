use std::path::{Path, PathBuf};

use tracing::debug;
use warren_core::{Access, AgentDescriptor, Result, SessionPermissions, WarrenError, segment_require};

use crate::resolve::{path_resolve_secure, path_sanitize, resolve_real};

/// Computes complete capability sets for new agents and for grants.
///
/// Every directory it emits is absolute and symlink-resolved, and every working
/// directory sits inside the sandbox root.
#[derive(Debug, Clone)]
pub struct PermissionsBuilder {
    users_dir: PathBuf,
    network: bool,
    events: bool,
}

impl PermissionsBuilder {
    pub fn new(users_dir: impl Into<PathBuf>) -> Self {
        Self {
            users_dir: users_dir.into(),
            network: false,
            events: false,
        }
    }

    /// Flags granted to every new top-level agent.
    pub fn with_defaults(mut self, network: bool, events: bool) -> Self {
        self.network = network;
        self.events = events;
        self
    }

    pub fn users_dir(&self) -> &Path {
        &self.users_dir
    }

    /// `<users_dir>/<user_id>`, the sandbox root of one user.
    pub fn user_root(&self, user_id: &str) -> Result<PathBuf> {
        let user_id = segment_require(user_id, "user id")?;
        resolve_real(&self.users_dir.join(user_id))
    }

    pub fn workspace_dir(&self, user_id: &str) -> Result<PathBuf> {
        Ok(self.user_root(user_id)?.join("workspace"))
    }

    /// Parent directory of all app directories of a user.
    pub fn apps_dir(&self, user_id: &str) -> Result<PathBuf> {
        Ok(self.workspace_dir(user_id)?.join("apps"))
    }

    /// Default workspace-only set for a user.
    pub fn for_user(&self, user_id: &str) -> Result<SessionPermissions> {
        Ok(SessionPermissions::workspace(self.workspace_dir(user_id)?)
            .with_network(self.network)
            .with_events(self.events))
    }

    /// Set for a new agent. Children inherit their parent's set when one is known.
    pub fn for_descriptor(
        &self,
        user_id: &str,
        descriptor: &AgentDescriptor,
        parent: Option<&SessionPermissions>,
    ) -> Result<SessionPermissions> {
        match descriptor {
            AgentDescriptor::Permanent {
                workspace_dir: Some(dir),
                ..
            } => {
                let root = self.user_root(user_id)?;
                let resolved = path_resolve_secure(&[root], dir).map_err(|_| {
                    WarrenError::PermissionDenied(format!(
                        "workspace {} is outside the sandbox of user {user_id}",
                        dir.display()
                    ))
                })?;
                Ok(SessionPermissions::workspace(resolved.real_path)
                    .with_network(self.network)
                    .with_events(self.events))
            }
            AgentDescriptor::App { app_id, .. } => {
                let app_id = segment_require(app_id, "app id")?;
                let dir = self.apps_dir(user_id)?.join(app_id);
                debug!(%user_id, %app_id, dir = %dir.display(), "app sandbox");
                Ok(SessionPermissions::workspace(dir.clone()).with_read_dirs(vec![dir]))
            }
            AgentDescriptor::Subagent { .. }
            | AgentDescriptor::MemoryAgent { .. }
            | AgentDescriptor::MemorySearch { .. } => match parent {
                Some(parent) => Ok(parent.clone()),
                None => self.for_user(user_id),
            },
            _ => self.for_user(user_id),
        }
    }

    /// A new complete set equal to `current` plus `access`. `current` is untouched.
    pub fn grant(current: &SessionPermissions, access: &Access) -> Result<SessionPermissions> {
        let mut next = current.clone();
        match access {
            Access::Network => next.network = true,
            Access::Events => next.events = true,
            Access::Workspace => {
                let working_dir = resolve_real(&next.working_dir)?;
                if !next.write_dirs.contains(&working_dir) {
                    next.write_dirs.push(working_dir);
                }
            }
            Access::Read { path } | Access::Write { path } => {
                path_sanitize(path)?;
                let resolved = resolve_real(path)?;
                let dirs = if matches!(access, Access::Read { .. }) {
                    &mut next.read_dirs
                } else {
                    &mut next.write_dirs
                };
                if !dirs.contains(&resolved) {
                    dirs.push(resolved);
                }
            }
        }
        Ok(next)
    }
}
