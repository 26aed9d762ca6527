//! Per-actor input-serialized, preemptable work loop.
//!
//! Grounded in `agent_manager.rs`'s `AgentManager` (the per-actor cache of
//! live state guarded by a lock, the get-or-create pattern for starting
//! one) generalized from "one agent per cache entry, never preempted"
//! into a driver that can be preempted mid-run. The buffer write chain
//! is new: nothing in the teacher serializes writes explicitly, so it is
//! modeled after `storage.rs`'s `Mutex`-guarded single connection,
//! reworked into an async single-consumer channel so a write's failure
//! never blocks the next one from starting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{Agent, AgentState};
use crate::error::CoreError;
use crate::events::{AgentEvent, EventBus, EventKind};
use crate::model::{ActorStatus, BufferKind, BufferMessage, Content, Message};
use crate::store::ShortTermMemoryDb;
use crate::tool::ToolRegistry;

/// Serializes writes to the short-term memory store: a write is handed to
/// a single background consumer over an unbounded channel, so write N+1
/// is only ever in flight after write N's call to the store has settled,
/// and a failed write is logged and does not stop the chain. Each
/// enqueue returns a receiver that resolves once that specific write has
/// been attempted, for callers (like the worker loop finalizing a run)
/// that need to know it landed before moving on; nothing requires
/// waiting on it.
#[derive(Clone)]
pub struct BufferChain {
    tx: mpsc::UnboundedSender<(Uuid, BufferMessage, tokio::sync::oneshot::Sender<()>)>,
}

impl BufferChain {
    pub fn spawn(db: Arc<dyn ShortTermMemoryDb>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(
            Uuid,
            BufferMessage,
            tokio::sync::oneshot::Sender<()>,
        )>();
        tokio::spawn(async move {
            while let Some((actor_id, message, ack)) = rx.recv().await {
                if let Err(err) = db.append(actor_id, message).await {
                    tracing::error!(%actor_id, error = %err, "buffer write failed");
                }
                let _ = ack.send(());
            }
        });
        Self { tx }
    }

    pub fn enqueue(&self, actor_id: Uuid, message: BufferMessage) -> tokio::sync::oneshot::Receiver<()> {
        let (ack_tx, ack_rx) = tokio::sync::oneshot::channel();
        // An unbounded sender only fails if the consumer task has been
        // dropped, which only happens if the worker itself is gone.
        let _ = self.tx.send((actor_id, message, ack_tx));
        ack_rx
    }
}

struct WorkerState {
    status: ActorStatus,
    queue: Vec<BufferMessage>,
    agent_state: Option<AgentState>,
    resume_after_abort: bool,
    processing: bool,
    cancel: Option<CancellationToken>,
}

pub struct WorkerConfig {
    pub actor_id: Uuid,
    pub base_tools: Arc<ToolRegistry>,
    /// System prompt template; every occurrence of the literal substring
    /// `{MEMORY_BUFFER}` is replaced with a rendering of the actor's
    /// recent buffer before each fresh run.
    pub system_prompt_template: String,
    pub recent_buffer_size: usize,
}

struct Inner {
    config: WorkerConfig,
    agent: Agent,
    state: Mutex<WorkerState>,
    /// Set synchronously, inside the `EmaReplyReceived` subscriber, before
    /// any `.await` point — this is the "explicit two-field atomic" the
    /// preemption invariant needs: by the time a concurrent `Work` call
    /// observes it, any reply already emitted this run is visible.
    has_reply_this_run: Arc<AtomicBool>,
    buffer_chain: BufferChain,
    short_term_db: Arc<dyn ShortTermMemoryDb>,
    run_done: watch::Sender<u64>,
    /// The ack receiver for the most recently enqueued reply buffer
    /// write, set by the `EmaReplyReceived` subscriber. `process_queue`
    /// awaits it after a run finishes so the next run's recent-buffer
    /// read is guaranteed to observe this run's reply — overwritten (not
    /// accumulated) on each further reply since the chain's single
    /// consumer processes writes strictly in order, so the latest ack
    /// settling implies every earlier one already has too.
    pending_reply_ack: Arc<std::sync::Mutex<Option<tokio::sync::oneshot::Receiver<()>>>>,
}

/// A long-lived, per-(user, actor) driver. Cheap to clone: it is a thin
/// handle around a shared `Inner`.
#[derive(Clone)]
pub struct ActorWorker {
    inner: Arc<Inner>,
}

impl ActorWorker {
    pub fn new(
        config: WorkerConfig,
        agent: Agent,
        events: Arc<EventBus>,
        short_term_db: Arc<dyn ShortTermMemoryDb>,
    ) -> Self {
        let has_reply_this_run = Arc::new(AtomicBool::new(false));
        let (run_done, _) = watch::channel(0u64);
        let buffer_chain = BufferChain::spawn(short_term_db.clone());

        // Spec §4.4: handling `EmaReplyReceived` is "(a) set
        // hasReplyThisRun, (b) enqueue the actor's reply onto the buffer
        // chain" — both happen synchronously, inside this subscriber,
        // before any await point, so a concurrent `Work` call sees the
        // flag and the write is ordered against later buffer writes.
        let pending_reply_ack = Arc::new(std::sync::Mutex::new(None));

        let flag = has_reply_this_run.clone();
        let reply_chain = buffer_chain.clone();
        let actor_id = config.actor_id;
        let ack_slot = pending_reply_ack.clone();
        events.subscribe(EventKind::EmaReplyReceived, move |event| {
            flag.store(true, Ordering::SeqCst);
            if let AgentEvent::EmaReplyReceived { reply } = event {
                let ack = reply_chain.enqueue(
                    actor_id,
                    BufferMessage {
                        kind: BufferKind::Actor,
                        id: Uuid::new_v4(),
                        name: "EMA".to_string(),
                        contents: vec![Content::text(
                            serde_json::to_string(reply).unwrap_or_default(),
                        )],
                        time: Utc::now(),
                    },
                );
                *ack_slot.lock().unwrap() = Some(ack);
            }
        });

        Self {
            inner: Arc::new(Inner {
                config,
                agent,
                state: Mutex::new(WorkerState {
                    status: ActorStatus::Idle,
                    queue: Vec::new(),
                    agent_state: None,
                    resume_after_abort: false,
                    processing: false,
                    cancel: None,
                }),
                has_reply_this_run,
                buffer_chain,
                short_term_db,
                pending_reply_ack,
                run_done,
            }),
        }
    }

    pub async fn status(&self) -> ActorStatus {
        self.inner.state.lock().await.status
    }

    /// Submit new user input. Returns once the input is durably enqueued:
    /// either a driver loop has been started to process it, or — if a
    /// run is already in flight — once that run has been asked to abort
    /// and has actually stopped.
    pub async fn work(&self, inputs: Vec<Content>) -> Result<(), CoreError> {
        if inputs.is_empty() {
            return Err(CoreError::InputValidation(
                "input must contain at least one content block".to_string(),
            ));
        }

        let buffer_message = BufferMessage {
            kind: BufferKind::User,
            id: Uuid::new_v4(),
            name: "User".to_string(),
            contents: inputs,
            time: Utc::now(),
        };
        self.inner
            .buffer_chain
            .enqueue(self.inner.config.actor_id, buffer_message.clone());

        let mut state = self.inner.state.lock().await;
        state.queue.push(buffer_message);

        if !state.processing {
            state.processing = true;
            drop(state);
            let inner = self.inner.clone();
            tokio::spawn(async move {
                process_queue(inner).await;
            });
            return Ok(());
        }

        // A run is already in flight: preempt it iff the user hasn't
        // already seen a reply from it, then wait for it to actually
        // stop before returning.
        state.resume_after_abort = !self.inner.has_reply_this_run.load(Ordering::SeqCst);
        tracing::info!(
            actor_id = %self.inner.config.actor_id,
            resume_after_abort = state.resume_after_abort,
            "preempting in-flight run"
        );
        let cancel = state.cancel.clone();
        let mut run_done = self.inner.run_done.subscribe();
        let seen = *run_done.borrow();
        drop(state);

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        while *run_done.borrow() == seen {
            if run_done.changed().await.is_err() {
                break;
            }
        }

        Ok(())
    }
}

async fn process_queue(inner: Arc<Inner>) {
    loop {
        let batch = {
            let mut state = inner.state.lock().await;
            if state.queue.is_empty() {
                state.processing = false;
                state.status = ActorStatus::Idle;
                return;
            }
            state.status = ActorStatus::Preparing;
            std::mem::take(&mut state.queue)
        };

        let batch_messages: Vec<Message> = batch
            .iter()
            .map(|b| Message::User {
                content: b.contents.clone(),
            })
            .collect();

        tracing::debug!(actor_id = %inner.config.actor_id, batch_size = batch.len(), "processing queue batch");

        let cancel = CancellationToken::new();
        let mut state = inner.state.lock().await;
        let resuming = state.resume_after_abort && state.agent_state.is_some();
        if resuming {
            state
                .agent_state
                .as_mut()
                .unwrap()
                .messages
                .extend(batch_messages);
        } else {
            let recent = inner
                .short_term_db
                .recent(inner.config.actor_id, inner.config.recent_buffer_size)
                .await
                .unwrap_or_default();
            let system_prompt = build_system_prompt(&inner.config.system_prompt_template, &recent);
            state.agent_state = Some(AgentState {
                system_prompt,
                messages: batch_messages,
                tools: inner.config.base_tools.clone(),
            });
        }
        state.resume_after_abort = false;
        inner.has_reply_this_run.store(false, Ordering::SeqCst);
        state.status = ActorStatus::Running;
        state.cancel = Some(cancel.clone());
        let mut agent_state = state.agent_state.take().expect("agent_state just set");
        drop(state);

        let _outcome = inner.agent.run(&mut agent_state, cancel).await;

        // If this run produced one or more replies, the event subscriber
        // above already enqueued each onto the buffer chain; wait for the
        // most recent one to land before this actor is reported idle, so
        // a subsequent run's recent-buffer read observes it.
        let ack = inner.pending_reply_ack.lock().unwrap().take();
        if let Some(ack) = ack {
            let _ = ack.await;
        }

        let mut state = inner.state.lock().await;
        state.cancel = None;
        if state.resume_after_abort {
            state.agent_state = Some(agent_state);
        } else {
            state.agent_state = None;
        }
        inner.run_done.send_modify(|v| *v += 1);
        drop(state);
    }
}

/// Last 10 buffer items, one per line:
/// `- [YYYY-MM-DD HH:MM:SS][role:<kind>][id:<id>][name:<name>] <joined contents>`.
fn render_recent_buffer(recent: &[BufferMessage]) -> String {
    if recent.is_empty() {
        return "None.".to_string();
    }
    let start = recent.len().saturating_sub(10);
    recent[start..]
        .iter()
        .map(|m| {
            let role = match m.kind {
                BufferKind::User => "user",
                BufferKind::Actor => "actor",
            };
            let text = m
                .contents
                .iter()
                .map(Content::as_text)
                .collect::<Vec<_>>()
                .join(" ");
            format!(
                "- [{}][role:{role}][id:{}][name:{}] {text}",
                m.time.format("%Y-%m-%d %H:%M:%S"),
                m.id,
                m.name
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_system_prompt(template: &str, recent: &[BufferMessage]) -> String {
    template.replace("{MEMORY_BUFFER}", &render_recent_buffer(recent))
}
