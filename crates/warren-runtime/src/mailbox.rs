use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex as TokioMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use warren_core::{
    AgentContext, AgentId, AgentLifecycle, AgentRecord, AgentState, AgentUpdate, ContextMessage,
    HistoryRecord, PendingReason, Result, Role, WarrenError,
};

use crate::lifecycle::agent_state_write;
use crate::router::{AgentRouter, RouterInner};
use crate::turn::{InboxItem, InboxResult, TurnContext, TurnOutcome};

pub(crate) type ReplyTx = oneshot::Sender<Result<InboxResult>>;

pub(crate) struct Envelope {
    pub item: InboxItem,
    pub reply: Option<ReplyTx>,
}

/// A bounded FIFO queue plus the worker that drains it, one per live agent.
///
/// The worker runs one turn at a time, so turns of the same agent never overlap.
pub(crate) struct Mailbox {
    tx: mpsc::Sender<Envelope>,
    /// Queued plus in-flight items.
    pending: Arc<AtomicUsize>,
    /// Serializes enqueue and wake against going to sleep.
    pub(crate) gate: TokioMutex<()>,
    capacity: usize,
    worker: JoinHandle<()>,
}

impl Mailbox {
    pub(crate) fn spawn(agent_id: AgentId, capacity: usize, router: Weak<RouterInner>) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let pending = Arc::new(AtomicUsize::new(0));
        let worker = tokio::spawn(run_worker(agent_id, rx, pending.clone(), router));
        Self {
            tx,
            pending,
            gate: TokioMutex::new(()),
            capacity,
            worker,
        }
    }

    /// Queue without waiting. A full queue is an error, never a wait.
    pub(crate) fn enqueue(&self, agent_id: &str, envelope: Envelope) -> Result<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        match self.tx.try_send(envelope) {
            Ok(()) => {
                debug!(agent_id, pending = self.pending(), "item queued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                warn!(agent_id, capacity = self.capacity, "mailbox full");
                Err(WarrenError::MailboxFull {
                    agent_id: agent_id.to_string(),
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Closed(_)) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                Err(WarrenError::MailboxClosed(agent_id.to_string()))
            }
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Stop the worker now. Queued envelopes drop with it, failing their awaiters.
    /// Dropping a mailbox without closing it lets the worker drain and exit.
    pub(crate) fn close(&self) {
        self.worker.abort();
    }
}

async fn run_worker(
    agent_id: AgentId,
    mut rx: mpsc::Receiver<Envelope>,
    pending: Arc<AtomicUsize>,
    router: Weak<RouterInner>,
) {
    debug!(%agent_id, "mailbox worker started");
    while let Some(envelope) = rx.recv().await {
        let result = match router.upgrade() {
            Some(inner) => {
                let router = AgentRouter::from_inner(inner);
                process_item(&router, &agent_id, envelope.item).await
            }
            None => Err(WarrenError::MailboxClosed(agent_id.clone())),
        };
        pending.fetch_sub(1, Ordering::SeqCst);

        if let Err(e) = &result {
            warn!(%agent_id, error = %e, "turn failed");
        }
        if let Some(reply) = envelope.reply {
            // The awaiter may have gone away; the turn still happened.
            let _ = reply.send(result);
        }
    }
    debug!(%agent_id, "mailbox worker stopped");
}

async fn process_item(router: &AgentRouter, agent_id: &str, item: InboxItem) -> Result<InboxResult> {
    let store = router.store();
    let agent = store
        .find_by_id(agent_id)
        .await?
        .ok_or_else(|| WarrenError::AgentNotFound(agent_id.to_string()))?;

    // Close tool calls orphaned by an earlier crash before the new turn sees history.
    router.reconcile(agent_id, PendingReason::SessionCrashed).await?;

    let mut state = store
        .state_read(agent_id)
        .await?
        .unwrap_or_else(|| AgentState::for_record(&agent));

    let now = Utc::now();
    let (text, role) = match &item {
        InboxItem::Reset { message } => {
            store
                .history_append(
                    agent_id,
                    &HistoryRecord::Reset {
                        at: now,
                        message: message.clone(),
                    },
                )
                .await?;
            store
                .update(
                    agent_id,
                    AgentUpdate::default().active_session(Some(Uuid::new_v4().to_string())),
                )
                .await?;
            state.context = AgentContext::default();
            state.snapshot = None;
            state.lifecycle = AgentLifecycle::Active;
            agent_state_write(store.as_ref(), router.sink().as_ref(), agent_id, state).await?;
            debug!(agent_id, "context reset");
            return Ok(InboxResult::NoResponse);
        }
        InboxItem::Message { text } => {
            store
                .history_append(
                    agent_id,
                    &HistoryRecord::UserMessage {
                        at: now,
                        text: text.clone(),
                    },
                )
                .await?;
            (text.clone(), Role::User)
        }
        InboxItem::SystemMessage { text, .. } => {
            store
                .history_append(
                    agent_id,
                    &HistoryRecord::Note {
                        at: now,
                        text: text.clone(),
                    },
                )
                .await?;
            (text.clone(), Role::System)
        }
    };
    state.context.messages.push(ContextMessage { role, text });
    state.stats.messages += 1;

    let session_id = session_begin(router, &agent).await?;
    let outcome = run_isolated(router, agent, state.clone(), session_id, item).await?;
    record_outcome(router, agent_id, state, outcome).await
}

/// The agent's session id, minting one when it has none.
async fn session_begin(router: &AgentRouter, agent: &AgentRecord) -> Result<String> {
    if let Some(session) = &agent.active_session_id {
        return Ok(session.clone());
    }
    let session = Uuid::new_v4().to_string();
    router
        .store()
        .update(
            &agent.id,
            AgentUpdate::default().active_session(Some(session.clone())),
        )
        .await?;
    Ok(session)
}

/// Run the executor on its own task so a panic becomes a failed turn.
async fn run_isolated(
    router: &AgentRouter,
    agent: AgentRecord,
    state: AgentState,
    session_id: String,
    item: InboxItem,
) -> Result<TurnOutcome> {
    let agent_id = agent.id.clone();
    let executor = router.executor();
    let ctx = TurnContext::new(agent, state, session_id, router.clone());

    debug!(%agent_id, kind = item.type_name(), "turn started");
    let handle = tokio::spawn(async move { executor.run_turn(ctx, item).await });
    match handle.await {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(e)) => Err(WarrenError::Turn {
            agent_id,
            reason: e.to_string(),
        }),
        Err(join) => Err(WarrenError::Turn {
            agent_id,
            reason: if join.is_panic() {
                "turn panicked".into()
            } else {
                "turn cancelled".into()
            },
        }),
    }
}

async fn record_outcome(
    router: &AgentRouter,
    agent_id: &str,
    mut state: AgentState,
    outcome: TurnOutcome,
) -> Result<InboxResult> {
    let store = router.store();
    let now = Utc::now();

    if !outcome.tool_calls.is_empty() {
        store
            .history_append(
                agent_id,
                &HistoryRecord::AssistantMessage {
                    at: now,
                    text: String::new(),
                    tool_calls: outcome.tool_calls.iter().map(|t| t.call.clone()).collect(),
                },
            )
            .await?;
        for exchange in &outcome.tool_calls {
            store
                .history_append(
                    agent_id,
                    &HistoryRecord::ToolResult {
                        at: now,
                        tool_call_id: exchange.call.id.clone(),
                        tool_name: exchange.call.tool_name.clone(),
                        output: exchange.output.clone(),
                        is_error: exchange.is_error,
                        reason: None,
                    },
                )
                .await?;
        }
    }

    let reply = outcome.reply.filter(|r| !r.trim().is_empty());
    if let Some(text) = &reply {
        store
            .history_append(
                agent_id,
                &HistoryRecord::AssistantMessage {
                    at: now,
                    text: text.clone(),
                    tool_calls: Vec::new(),
                },
            )
            .await?;
        state.context.messages.push(ContextMessage {
            role: Role::Assistant,
            text: text.clone(),
        });
        state.stats.messages += 1;
    }

    state.stats.turns += 1;
    if let Some(tokens) = outcome.tokens {
        state.tokens.get_or_insert_with(Default::default).add(tokens);
    }
    if outcome.snapshot.is_some() {
        state.snapshot = outcome.snapshot;
    }
    state.lifecycle = AgentLifecycle::Active;
    agent_state_write(store.as_ref(), router.sink().as_ref(), agent_id, state).await?;

    debug!(agent_id, replied = reply.is_some(), "turn finished");
    Ok(match reply {
        Some(text) => InboxResult::Reply(text),
        None => InboxResult::NoResponse,
    })
}
