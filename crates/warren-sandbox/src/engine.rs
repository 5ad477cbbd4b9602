use std::path::PathBuf;
use std::sync::LazyLock;

use tracing::{debug, warn};
use warren_core::{Access, SessionPermissions};

use crate::rules::{
    AccessRequest, AccessRule, AccessVerdict, AppIsolationRule, CapabilityRule, PathShapeRule,
    PolicyFileRule, SandboxRootRule,
};

/// Applies every registered rule in order; the first denial wins.
pub struct AccessEngine {
    rules: Vec<Box<dyn AccessRule>>,
}

impl Default for AccessEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessEngine {
    pub fn new() -> Self {
        let mut engine = Self { rules: Vec::new() };
        // Shape checks run before anything touches the filesystem.
        engine.add_rule(Box::new(CapabilityRule));
        engine.add_rule(Box::new(PathShapeRule));
        engine.add_rule(Box::new(PolicyFileRule));
        engine.add_rule(Box::new(SandboxRootRule));
        engine.add_rule(Box::new(AppIsolationRule));
        engine
    }

    pub fn add_rule(&mut self, rule: Box<dyn AccessRule>) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn evaluate(&self, request: &AccessRequest<'_>) -> AccessVerdict {
        for rule in &self.rules {
            let verdict = rule.evaluate(request);
            if let AccessVerdict::Deny(reason) = &verdict {
                debug!(rule = rule.name(), access = %request.access, %reason, "access denied");
                return verdict;
            }
        }
        AccessVerdict::Allow
    }
}

static DEFAULT_ENGINE: LazyLock<AccessEngine> = LazyLock::new(AccessEngine::new);

/// Whether `permissions` allow `access`. Denial is an ordinary `false`.
pub fn access_allows(permissions: &SessionPermissions, access: &Access) -> bool {
    DEFAULT_ENGINE
        .evaluate(&AccessRequest::new(permissions, access))
        .is_allowed()
}

/// An agent's capability set together with its app scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSandbox {
    pub permissions: SessionPermissions,
    pub app_id: Option<String>,
    pub apps_dirs: Vec<PathBuf>,
}

impl AgentSandbox {
    pub fn new(permissions: SessionPermissions) -> Self {
        Self {
            permissions,
            app_id: None,
            apps_dirs: Vec::new(),
        }
    }

    pub fn with_app_id(mut self, app_id: Option<String>) -> Self {
        self.app_id = app_id;
        self
    }

    pub fn with_apps_dir(mut self, dir: PathBuf) -> Self {
        self.apps_dirs.push(dir);
        self
    }

    /// Full evaluation including app isolation.
    pub fn check(&self, access: &Access) -> AccessVerdict {
        let request = AccessRequest::new(&self.permissions, access)
            .with_app(self.app_id.as_deref(), &self.apps_dirs);
        let verdict = DEFAULT_ENGINE.evaluate(&request);
        if let AccessVerdict::Deny(reason) = &verdict {
            warn!(access = %access, app_id = ?self.app_id, %reason, "sandbox denied access");
        }
        verdict
    }

    pub fn allows(&self, access: &Access) -> bool {
        self.check(access).is_allowed()
    }
}
