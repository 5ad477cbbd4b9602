use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex as TokioMutex, broadcast, oneshot};
use tracing::{debug, info, warn};

use warren_config::WarrenConfig;
use warren_core::{
    Access, AgentDescriptor, AgentId, AgentLifecycle, AgentRecord, AgentStore, AgentUpdate,
    FanoutSink, HistoryRecord, Observation, ObservationBus, ObservationSink, PathContext, PendingReason, Result,
    SessionPermissions, WarrenError, path_from_descriptor, pending_tool_results, segment_require,
};
use warren_sandbox::{AccessVerdict, AgentSandbox, PermissionsBuilder};

use crate::allocator::allocate_child_path;
use crate::lifecycle::agent_lifecycle_set;
use crate::mailbox::{Envelope, Mailbox};
use crate::turn::{InboxItem, InboxResult, TurnExecutor};

/// Where a post goes: an existing agent, or a descriptor materialized on first contact.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentTarget {
    Id(AgentId),
    Descriptor {
        user_id: String,
        descriptor: AgentDescriptor,
    },
}

impl AgentTarget {
    pub fn id(agent_id: impl Into<String>) -> Self {
        AgentTarget::Id(agent_id.into())
    }

    pub fn descriptor(user_id: impl Into<String>, descriptor: AgentDescriptor) -> Self {
        AgentTarget::Descriptor {
            user_id: user_id.into(),
            descriptor,
        }
    }
}

pub(crate) struct RouterInner {
    store: Arc<dyn AgentStore>,
    executor: Arc<dyn TurnExecutor>,
    sink: Arc<dyn ObservationSink>,
    bus: ObservationBus,
    permissions: PermissionsBuilder,
    mailboxes: DashMap<AgentId, Arc<Mailbox>>,
    /// Held across load-and-append of reconciliation. Outlives mailbox retirement.
    history_locks: DashMap<AgentId, Arc<TokioMutex<()>>>,
    mailbox_capacity: usize,
}

/// Builder for [`AgentRouter`].
pub struct AgentRouterBuilder {
    store: Arc<dyn AgentStore>,
    executor: Arc<dyn TurnExecutor>,
    permissions: PermissionsBuilder,
    sink: Option<Arc<dyn ObservationSink>>,
    mailbox_capacity: usize,
    observation_capacity: usize,
}

impl AgentRouterBuilder {
    /// Extra sink fed alongside the router's own observation bus.
    pub fn sink(mut self, sink: Arc<dyn ObservationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Buffer size of the router's observation bus.
    pub fn observation_capacity(mut self, capacity: usize) -> Self {
        self.observation_capacity = capacity.max(1);
        self
    }

    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> AgentRouter {
        let bus = ObservationBus::new(self.observation_capacity);
        let sink: Arc<dyn ObservationSink> = match self.sink {
            Some(extra) => Arc::new(FanoutSink::new().with(Arc::new(bus.clone())).with(extra)),
            None => Arc::new(bus.clone()),
        };
        AgentRouter {
            inner: Arc::new(RouterInner {
                store: self.store,
                executor: self.executor,
                sink,
                bus,
                permissions: self.permissions,
                mailboxes: DashMap::new(),
                history_locks: DashMap::new(),
                mailbox_capacity: self.mailbox_capacity,
            }),
        }
    }
}

/// Resolves targets to agents and delivers items into their mailboxes.
///
/// Each agent owns its own queue and worker; there is no global lock, so agents
/// run in parallel while each one sees its items strictly in arrival order.
#[derive(Clone)]
pub struct AgentRouter {
    inner: Arc<RouterInner>,
}

impl AgentRouter {
    pub fn builder(
        store: Arc<dyn AgentStore>,
        executor: Arc<dyn TurnExecutor>,
        permissions: PermissionsBuilder,
    ) -> AgentRouterBuilder {
        AgentRouterBuilder {
            store,
            executor,
            permissions,
            sink: None,
            mailbox_capacity: 256,
            observation_capacity: 1024,
        }
    }

    /// Builder wired from `warren.toml` settings: sandbox root, default capabilities,
    /// mailbox depth, and observation bus size.
    pub fn from_config(
        config: &WarrenConfig,
        store: Arc<dyn AgentStore>,
        executor: Arc<dyn TurnExecutor>,
    ) -> AgentRouterBuilder {
        let permissions = PermissionsBuilder::new(config.sandbox.users_dir.clone())
            .with_defaults(config.sandbox.network, config.sandbox.events);
        Self::builder(store, executor, permissions)
            .mailbox_capacity(config.runtime.mailbox_capacity)
            .observation_capacity(config.runtime.observation_capacity)
    }

    pub(crate) fn from_inner(inner: Arc<RouterInner>) -> Self {
        Self { inner }
    }

    pub fn store(&self) -> &Arc<dyn AgentStore> {
        &self.inner.store
    }

    pub fn sink(&self) -> &Arc<dyn ObservationSink> {
        &self.inner.sink
    }

    /// Observations emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Observation> {
        self.inner.bus.subscribe()
    }

    pub fn permissions(&self) -> &PermissionsBuilder {
        &self.inner.permissions
    }

    pub(crate) fn executor(&self) -> Arc<dyn TurnExecutor> {
        self.inner.executor.clone()
    }

    fn mailbox(&self, agent_id: &str) -> Arc<Mailbox> {
        self.inner
            .mailboxes
            .entry(agent_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mailbox::spawn(
                    agent_id.to_string(),
                    self.inner.mailbox_capacity,
                    Arc::downgrade(&self.inner),
                ))
            })
            .value()
            .clone()
    }

    /// Whether `mailbox` is still the one registered for `agent_id`.
    fn is_current(&self, agent_id: &str, mailbox: &Arc<Mailbox>) -> bool {
        self.inner
            .mailboxes
            .get(agent_id)
            .is_some_and(|m| Arc::ptr_eq(m.value(), mailbox))
    }

    fn history_lock(&self, agent_id: &str) -> Arc<TokioMutex<()>> {
        self.inner
            .history_locks
            .entry(agent_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Queued plus in-flight items for an agent.
    pub fn pending(&self, agent_id: &str) -> usize {
        self.inner
            .mailboxes
            .get(agent_id)
            .map(|m| m.pending())
            .unwrap_or(0)
    }

    pub async fn agent(&self, agent_id: &str) -> Result<AgentRecord> {
        self.inner
            .store
            .find_by_id(agent_id)
            .await?
            .ok_or_else(|| WarrenError::AgentNotFound(agent_id.to_string()))
    }

    // ── Resolution ─────────────────────────────────────────────

    /// Idempotent materialization: the same descriptor always lands on the same agent.
    pub async fn resolve_agent(&self, target: &AgentTarget) -> Result<AgentId> {
        Ok(self.resolve_record(target).await?.id)
    }

    pub async fn resolve_record(&self, target: &AgentTarget) -> Result<AgentRecord> {
        match target {
            AgentTarget::Id(id) => self.agent(id).await,
            AgentTarget::Descriptor {
                user_id,
                descriptor,
            } => self.materialize(user_id, descriptor).await,
        }
    }

    async fn materialize(&self, user_id: &str, descriptor: &AgentDescriptor) -> Result<AgentRecord> {
        segment_require(user_id, "user id")?;
        descriptor.validate()?;
        let store = &self.inner.store;

        let existing = match descriptor.identity_key() {
            Some(key) => store.find_by_key(&key).await?,
            None => {
                let path = path_from_descriptor(descriptor, &PathContext::for_user(user_id))?;
                store.find_by_path(&path).await?
            }
        };
        if let Some(existing) = existing {
            return same_user(existing, user_id);
        }

        let mut parent = match descriptor.parent_agent_id() {
            Some(parent_id) => store.find_by_id(parent_id).await?,
            None => None,
        };
        if let Some(parent) = &parent
            && parent.user_id != user_id
        {
            return Err(WarrenError::CrossUser {
                agent_id: parent.id.clone(),
                user_id: user_id.to_string(),
            });
        }

        let ctx = PathContext::for_user(user_id);
        let path = match (&parent, descriptor.child_kind()) {
            (Some(parent), Some(kind)) => {
                let child = allocate_child_path(store.as_ref(), &parent.id, kind).await?;
                path_from_descriptor(descriptor, &ctx.with_allocated(&child))?
            }
            _ => path_from_descriptor(descriptor, &ctx)?,
        };

        // A memory agent hangs off the agent whose path it extends.
        if parent.is_none()
            && descriptor.kind().is_child()
            && let Some(parent_path) = path.parent()
        {
            parent = store
                .find_by_path(&parent_path)
                .await?
                .filter(|p| p.user_id == user_id);
        }

        let permissions = self.inner.permissions.for_descriptor(
            user_id,
            descriptor,
            parent.as_ref().map(|p| &p.permissions),
        )?;
        tokio::fs::create_dir_all(&permissions.working_dir).await?;

        let record = AgentRecord::new(user_id, descriptor.clone(), path, permissions);
        let created = store.create(record.clone()).await?;
        if created.id == record.id {
            store
                .history_append(
                    &created.id,
                    &HistoryRecord::Start {
                        at: created.created_at,
                    },
                )
                .await?;
            info!(
                agent_id = %created.id,
                %user_id,
                path = %created.path,
                kind = descriptor.type_name(),
                "agent materialized"
            );
        }
        same_user(created, user_id)
    }

    // ── Delivery ───────────────────────────────────────────────

    /// Fire-and-forget: queue the item and return the target's id.
    pub async fn post(&self, target: AgentTarget, item: InboxItem) -> Result<AgentId> {
        let record = self.resolve_record(&target).await?;
        self.deliver(&record, Envelope { item, reply: None }).await?;
        Ok(record.id)
    }

    /// Queue the item and wait for the turn that handles it.
    pub async fn post_and_await(&self, target: AgentTarget, item: InboxItem) -> Result<InboxResult> {
        let record = self.resolve_record(&target).await?;
        self.await_reply(&record, item).await
    }

    /// Post on behalf of another agent. Both must belong to the same user.
    pub async fn post_from(&self, from: &str, target: AgentTarget, item: InboxItem) -> Result<AgentId> {
        let sender = self.agent(from).await?;
        let record = self.resolve_record(&target).await?;
        let record = same_user(record, &sender.user_id)?;
        self.deliver(&record, Envelope { item, reply: None }).await?;
        Ok(record.id)
    }

    /// Like [`post_from`](Self::post_from) but waits for the reply.
    pub async fn post_from_and_await(
        &self,
        from: &str,
        target: AgentTarget,
        item: InboxItem,
    ) -> Result<InboxResult> {
        let sender = self.agent(from).await?;
        let record = same_user(self.resolve_record(&target).await?, &sender.user_id)?;
        self.await_reply(&record, item).await
    }

    async fn await_reply(&self, record: &AgentRecord, item: InboxItem) -> Result<InboxResult> {
        let (tx, rx) = oneshot::channel();
        self.deliver(
            record,
            Envelope {
                item,
                reply: Some(tx),
            },
        )
        .await?;
        rx.await
            .map_err(|_| WarrenError::MailboxClosed(record.id.clone()))?
    }

    /// Wake the agent if it sleeps, then queue. Never waits on a running turn.
    async fn deliver(&self, record: &AgentRecord, envelope: Envelope) -> Result<()> {
        loop {
            let mailbox = self.mailbox(&record.id);
            let _gate = mailbox.gate.lock().await;
            // Retired by sleep_if_idle while we waited; go again with a fresh one.
            if !self.is_current(&record.id, &mailbox) {
                continue;
            }

            let current = self.agent(&record.id).await?;
            if current.lifecycle == AgentLifecycle::Sleeping {
                agent_lifecycle_set(
                    self.inner.store.as_ref(),
                    self.inner.sink.as_ref(),
                    &current.id,
                    AgentLifecycle::Active,
                )
                .await?;
            }
            debug!(agent_id = %record.id, kind = envelope.item.type_name(), "delivering");
            return mailbox.enqueue(&record.id, envelope);
        }
    }

    // ── Foreground ─────────────────────────────────────────────

    /// The user's best foreground agent: connector agents first, then swarm, then
    /// permanent; active before sleeping; most recently updated first.
    pub async fn most_recent_foreground(&self, user_id: &str) -> Result<Option<AgentRecord>> {
        let mut candidates: Vec<AgentRecord> = self
            .inner
            .store
            .find_by_user(user_id)
            .await?
            .into_iter()
            .filter(AgentRecord::is_foreground)
            .collect();
        candidates.sort_by(foreground_order);
        Ok(candidates.into_iter().next())
    }

    /// Deliver to the sender's parent, or to the most recent foreground agent.
    pub async fn post_to_foreground(&self, from: &str, item: InboxItem) -> Result<AgentId> {
        let sender = self.agent(from).await?;
        if let Some(parent_id) = sender.descriptor.parent_agent_id()
            && let Some(parent) = self.inner.store.find_by_id(parent_id).await?
        {
            let parent = same_user(parent, &sender.user_id)?;
            self.deliver(&parent, Envelope { item, reply: None }).await?;
            return Ok(parent.id);
        }

        let target = self
            .most_recent_foreground(&sender.user_id)
            .await?
            .ok_or_else(|| {
                WarrenError::AgentNotFound(format!("foreground agent of user {}", sender.user_id))
            })?;
        self.deliver(&target, Envelope { item, reply: None }).await?;
        Ok(target.id)
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Put an agent to sleep when nothing is queued or running. Returns whether it sleeps.
    ///
    /// A sleeping agent gives up its mailbox; the next delivery spawns a new one.
    pub async fn sleep_if_idle(&self, agent_id: &str) -> Result<bool> {
        loop {
            let mailbox = self.mailbox(agent_id);
            let _gate = mailbox.gate.lock().await;
            if !self.is_current(agent_id, &mailbox) {
                continue;
            }
            if !mailbox.is_idle() {
                debug!(agent_id, pending = mailbox.pending(), "not idle, staying awake");
                return Ok(false);
            }

            let record = self.agent(agent_id).await?;
            if record.lifecycle != AgentLifecycle::Sleeping {
                agent_lifecycle_set(
                    self.inner.store.as_ref(),
                    self.inner.sink.as_ref(),
                    agent_id,
                    AgentLifecycle::Sleeping,
                )
                .await?;
            }
            self.inner
                .mailboxes
                .remove_if(agent_id, |_, m| Arc::ptr_eq(m, &mailbox));
            debug!(agent_id, "mailbox retired");
            return Ok(true);
        }
    }

    pub async fn wake(&self, agent_id: &str) -> Result<()> {
        loop {
            let mailbox = self.mailbox(agent_id);
            let _gate = mailbox.gate.lock().await;
            if !self.is_current(agent_id, &mailbox) {
                continue;
            }
            let record = self.agent(agent_id).await?;
            if record.lifecycle == AgentLifecycle::Sleeping {
                agent_lifecycle_set(
                    self.inner.store.as_ref(),
                    self.inner.sink.as_ref(),
                    agent_id,
                    AgentLifecycle::Active,
                )
                .await?;
            }
            return Ok(());
        }
    }

    /// Live mailboxes, one per agent that is awake and has been posted to.
    pub fn mailbox_count(&self) -> usize {
        self.inner.mailboxes.len()
    }

    /// Bring persisted active agents back after a restart. Call once, before posting.
    pub async fn restore(&self) -> Result<usize> {
        let mut restored = 0;
        for record in self.inner.store.find_all().await? {
            if record.lifecycle != AgentLifecycle::Active {
                continue;
            }
            self.reconcile(&record.id, PendingReason::SessionCrashed)
                .await?;
            self.mailbox(&record.id);
            restored += 1;
        }
        info!(restored, "agents restored");
        Ok(restored)
    }

    /// Delete an agent. Queued awaiters fail with `MailboxClosed`.
    pub async fn remove_agent(&self, agent_id: &str) -> Result<bool> {
        if let Some((_, mailbox)) = self.inner.mailboxes.remove(agent_id) {
            mailbox.close();
        }
        self.inner.history_locks.remove(agent_id);
        let removed = self.inner.store.remove(agent_id).await?;
        if !removed {
            warn!(agent_id, "remove of unknown agent");
        }
        Ok(removed)
    }

    // ── History ────────────────────────────────────────────────

    /// Close every pending tool call with a synthesized error result.
    ///
    /// Load and append run under the agent's history lock, so concurrent passes
    /// never close the same call twice.
    pub async fn reconcile(&self, agent_id: &str, reason: PendingReason) -> Result<usize> {
        let lock = self.history_lock(agent_id);
        let _guard = lock.lock().await;
        self.reconcile_locked(agent_id, reason).await
    }

    async fn reconcile_locked(&self, agent_id: &str, reason: PendingReason) -> Result<usize> {
        let store = &self.inner.store;
        let history = store.history_load(agent_id).await?;
        let results = pending_tool_results(&history, reason, Utc::now());
        for result in &results {
            store.history_append(agent_id, result).await?;
        }
        if !results.is_empty() {
            warn!(
                agent_id,
                count = results.len(),
                reason = reason.as_str(),
                "reconciled pending tool calls"
            );
        }
        Ok(results.len())
    }

    /// History as the next turn will see it. Calls of a running turn are left open.
    pub async fn history(&self, agent_id: &str) -> Result<Vec<HistoryRecord>> {
        {
            let lock = self.history_lock(agent_id);
            let _guard = lock.lock().await;
            // A turn queued after this check reconciles behind the lock before it runs.
            if self.pending(agent_id) == 0 {
                self.reconcile_locked(agent_id, PendingReason::SessionCrashed)
                    .await?;
            }
        }
        self.inner.store.history_load(agent_id).await
    }

    // ── Permissions ────────────────────────────────────────────

    /// Evaluate an agent's stored capability set, app isolation included.
    pub async fn check_access(&self, agent_id: &str, access: &Access) -> Result<AccessVerdict> {
        let record = self.agent(agent_id).await?;
        Ok(agent_sandbox(&self.inner.permissions, &record)?.check(access))
    }

    /// Replace the agent's capability set with one that also allows `access`.
    pub async fn grant_permission(&self, agent_id: &str, access: &Access) -> Result<SessionPermissions> {
        let record = self.agent(agent_id).await?;
        let next = PermissionsBuilder::grant(&record.permissions, access)?;
        let updated = self
            .inner
            .store
            .update(agent_id, AgentUpdate::default().permissions(next.clone()))
            .await?;
        if !updated {
            return Err(WarrenError::AgentNotFound(agent_id.to_string()));
        }
        info!(agent_id, %access, "permission granted");
        Ok(next)
    }
}

/// The sandbox an agent's tools run in: its stored set plus its app scope.
pub fn agent_sandbox(permissions: &PermissionsBuilder, record: &AgentRecord) -> Result<AgentSandbox> {
    let app_id = record.descriptor.app_id().map(str::to_string);
    let mut apps_dirs: Vec<PathBuf> = vec![permissions.apps_dir(&record.user_id)?];
    let own = record.permissions.working_dir.join("apps");
    if app_id.is_none() && !apps_dirs.contains(&own) {
        apps_dirs.push(own);
    }

    let sandbox = AgentSandbox::new(record.permissions.clone()).with_app_id(app_id);
    Ok(apps_dirs
        .into_iter()
        .fold(sandbox, |sandbox, dir| sandbox.with_apps_dir(dir)))
}

fn same_user(record: AgentRecord, user_id: &str) -> Result<AgentRecord> {
    if record.user_id == user_id {
        Ok(record)
    } else {
        Err(WarrenError::CrossUser {
            agent_id: record.id,
            user_id: user_id.to_string(),
        })
    }
}

fn foreground_rank(descriptor: &AgentDescriptor) -> u8 {
    match descriptor {
        AgentDescriptor::User { .. } => 0,
        AgentDescriptor::Swarm { .. } => 1,
        AgentDescriptor::Permanent { .. } => 2,
        _ => 3,
    }
}

fn foreground_order(a: &AgentRecord, b: &AgentRecord) -> Ordering {
    foreground_rank(&a.descriptor)
        .cmp(&foreground_rank(&b.descriptor))
        .then_with(|| {
            let asleep = |r: &AgentRecord| r.lifecycle == AgentLifecycle::Sleeping;
            asleep(a).cmp(&asleep(b))
        })
        .then_with(|| b.updated_at.cmp(&a.updated_at))
}
