use std::path::{Path, PathBuf};

use warren_core::{Access, SessionPermissions};

use crate::resolve::{normalize_lexical, path_resolve_secure, path_sanitize, resolve_real};

/// Files inside `apps/<id>/` that define an app and must not be rewritten by it.
pub const POLICY_FILES: &[&str] = &["APP.md", "PERMISSIONS.md"];

/// Outcome of evaluating one access request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessVerdict {
    Allow,
    /// Denied, with a reason suitable for a "permission needed" message.
    Deny(String),
}

impl AccessVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessVerdict::Allow)
    }
}

/// Everything a rule may look at.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    pub permissions: &'a SessionPermissions,
    pub access: &'a Access,
    /// App id when the requesting agent is an app.
    pub app_id: Option<&'a str>,
    /// Roots whose first-level children are app directories.
    pub apps_dirs: &'a [PathBuf],
}

impl<'a> AccessRequest<'a> {
    pub fn new(permissions: &'a SessionPermissions, access: &'a Access) -> Self {
        Self {
            permissions,
            access,
            app_id: None,
            apps_dirs: &[],
        }
    }

    pub fn with_app(mut self, app_id: Option<&'a str>, apps_dirs: &'a [PathBuf]) -> Self {
        self.app_id = app_id;
        self.apps_dirs = apps_dirs;
        self
    }
}

/// A single access rule.
pub trait AccessRule: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(&self, request: &AccessRequest<'_>) -> AccessVerdict;
}

// ── Built-in rules ─────────────────────────────────────────────

/// Network, events, and workspace flags.
pub(crate) struct CapabilityRule;

impl AccessRule for CapabilityRule {
    fn name(&self) -> &str {
        "capability"
    }

    fn evaluate(&self, request: &AccessRequest<'_>) -> AccessVerdict {
        let perms = request.permissions;
        match request.access {
            Access::Network if !perms.network => AccessVerdict::Deny("network access is not granted".into()),
            Access::Events if !perms.events => AccessVerdict::Deny("events access is not granted".into()),
            Access::Workspace => {
                if path_resolve_secure(&perms.write_dirs, &perms.working_dir).is_ok() {
                    AccessVerdict::Allow
                } else {
                    AccessVerdict::Deny("workspace is not writable".into())
                }
            }
            _ => AccessVerdict::Allow,
        }
    }
}

/// Targets must be absolute and clean before anything resolves them.
pub(crate) struct PathShapeRule;

impl AccessRule for PathShapeRule {
    fn name(&self) -> &str {
        "path_shape"
    }

    fn evaluate(&self, request: &AccessRequest<'_>) -> AccessVerdict {
        let Some(path) = request.access.path() else {
            return AccessVerdict::Allow;
        };
        if !path.is_absolute() {
            return AccessVerdict::Deny("Path must be absolute.".into());
        }
        match path_sanitize(path) {
            Ok(()) => AccessVerdict::Allow,
            Err(e) => AccessVerdict::Deny(e.to_string()),
        }
    }
}

/// `apps/<id>/APP.md` or `apps/<id>/PERMISSIONS.md`.
pub fn is_app_policy_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if !POLICY_FILES.contains(&name) {
        return false;
    }
    path.parent()
        .and_then(Path::parent)
        .and_then(Path::file_name)
        .is_some_and(|n| n == "apps")
}

/// Writes to app policy files need an explicit grant of that exact file.
pub(crate) struct PolicyFileRule;

impl AccessRule for PolicyFileRule {
    fn name(&self) -> &str {
        "policy_file"
    }

    fn evaluate(&self, request: &AccessRequest<'_>) -> AccessVerdict {
        let Access::Write { path } = request.access else {
            return AccessVerdict::Allow;
        };
        let lexical = normalize_lexical(path);
        let real = resolve_real(path).unwrap_or_else(|_| lexical.clone());
        if !is_app_policy_file(&lexical) && !is_app_policy_file(&real) {
            return AccessVerdict::Allow;
        }

        let granted = request.permissions.write_dirs.iter().any(|dir| {
            normalize_lexical(dir) == lexical
                || resolve_real(dir).is_ok_and(|resolved| resolved == real)
        });
        if granted {
            AccessVerdict::Allow
        } else {
            AccessVerdict::Deny(format!(
                "{} is an app policy file and was not granted explicitly",
                lexical.display()
            ))
        }
    }
}

/// Real path must land inside the allowed roots for the access kind.
pub(crate) struct SandboxRootRule;

impl SandboxRootRule {
    fn roots(perms: &SessionPermissions, access: &Access) -> Vec<PathBuf> {
        match access {
            Access::Write { .. } => perms.write_dirs.clone(),
            Access::Read { .. } if perms.read_dirs.is_empty() => vec![PathBuf::from("/")],
            Access::Read { .. } => {
                let mut roots = Vec::with_capacity(1 + perms.read_dirs.len() + perms.write_dirs.len());
                roots.push(perms.working_dir.clone());
                roots.extend(perms.read_dirs.iter().cloned());
                roots.extend(perms.write_dirs.iter().cloned());
                roots
            }
            _ => Vec::new(),
        }
    }
}

impl AccessRule for SandboxRootRule {
    fn name(&self) -> &str {
        "sandbox_root"
    }

    fn evaluate(&self, request: &AccessRequest<'_>) -> AccessVerdict {
        let Some(path) = request.access.path() else {
            return AccessVerdict::Allow;
        };
        let roots = Self::roots(request.permissions, request.access);
        match path_resolve_secure(&roots, path) {
            Ok(_) => AccessVerdict::Allow,
            Err(e) => AccessVerdict::Deny(e.to_string()),
        }
    }
}

/// Paths under an apps root belong to exactly one app.
pub(crate) struct AppIsolationRule;

impl AccessRule for AppIsolationRule {
    fn name(&self) -> &str {
        "app_isolation"
    }

    fn evaluate(&self, request: &AccessRequest<'_>) -> AccessVerdict {
        let Some(path) = request.access.path() else {
            return AccessVerdict::Allow;
        };
        if app_access_allows(request.app_id, request.apps_dirs, path) {
            AccessVerdict::Allow
        } else {
            AccessVerdict::Deny(format!(
                "{} belongs to another app",
                normalize_lexical(path).display()
            ))
        }
    }
}

/// Whether an agent with `app_id` (or none) may touch `path` given the apps roots.
///
/// Paths outside every apps root are not this guard's business. Inside one, the
/// first segment below the root must equal the agent's own app id.
pub fn app_access_allows(app_id: Option<&str>, apps_dirs: &[PathBuf], path: &Path) -> bool {
    let lexical = normalize_lexical(path);
    let real = resolve_real(path).unwrap_or_else(|_| lexical.clone());

    for root in apps_dirs {
        let root_lexical = normalize_lexical(root);
        let root_real = resolve_real(root).unwrap_or_else(|_| root_lexical.clone());
        for (candidate, base) in [(&lexical, &root_lexical), (&real, &root_real)] {
            let Ok(rest) = candidate.strip_prefix(base) else {
                continue;
            };
            let owner = rest.components().next().and_then(|c| c.as_os_str().to_str());
            match (owner, app_id) {
                (Some(owner), Some(own)) if owner == own => {}
                _ => return false,
            }
        }
    }
    true
}
