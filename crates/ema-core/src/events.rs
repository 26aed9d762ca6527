//! Typed, name-indexed pub/sub.
//!
//! The corpus has no literal event bus to copy; this is assembled from
//! two things it does have: `cloudllm::event`'s enum-of-payloads shape
//! (one `AgentEvent` variant per thing worth observing) and `sage`'s
//! background-task pattern in `scheduler::spawn_scheduler` for driving a
//! channel. Dispatch here is synchronous rather than channel-based,
//! matching the requirement that a reply interception be visible to the
//! worker loop before the next `.await` point, not after a hop through a
//! task.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::model::{LLMResponse, Reply, ToolResult};
use serde_json::{Map, Value};

/// Handle returned by `EventBus::subscribe`, used to detach a handler
/// later via `EventBus::unsubscribe`. Opaque and cheap to hold onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StepStarted,
    LlmResponseReceived,
    ToolCallStarted,
    ToolCallFinished,
    EmaReplyReceived,
    SummarizeMessagesStarted,
    SummarizeMessagesFinished,
    CreateSummaryFinished,
    RunFinished,
    TokenEstimationFallbacked,
}

#[derive(Debug, Clone)]
pub enum AgentEvent {
    StepStarted {
        step: u32,
        max_steps: u32,
    },
    LlmResponseReceived {
        response: LLMResponse,
    },
    ToolCallStarted {
        id: Option<String>,
        name: String,
        args: Map<String, Value>,
    },
    ToolCallFinished {
        ok: bool,
        id: Option<String>,
        name: String,
        result: ToolResult,
    },
    EmaReplyReceived {
        reply: Reply,
    },
    SummarizeMessagesStarted {
        local_estimated_tokens: usize,
        api_reported_tokens: usize,
        token_limit: usize,
    },
    SummarizeMessagesFinished {
        ok: bool,
        old_tokens: Option<usize>,
        new_tokens: Option<usize>,
        user_message_count: Option<usize>,
        summary_count: Option<usize>,
    },
    CreateSummaryFinished {
        ok: bool,
        round_num: usize,
        summary_text: Option<String>,
        error: Option<String>,
    },
    RunFinished {
        ok: bool,
        msg: Option<String>,
        error: Option<String>,
    },
    TokenEstimationFallbacked {
        error: String,
    },
}

impl AgentEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AgentEvent::StepStarted { .. } => EventKind::StepStarted,
            AgentEvent::LlmResponseReceived { .. } => EventKind::LlmResponseReceived,
            AgentEvent::ToolCallStarted { .. } => EventKind::ToolCallStarted,
            AgentEvent::ToolCallFinished { .. } => EventKind::ToolCallFinished,
            AgentEvent::EmaReplyReceived { .. } => EventKind::EmaReplyReceived,
            AgentEvent::SummarizeMessagesStarted { .. } => EventKind::SummarizeMessagesStarted,
            AgentEvent::SummarizeMessagesFinished { .. } => EventKind::SummarizeMessagesFinished,
            AgentEvent::CreateSummaryFinished { .. } => EventKind::CreateSummaryFinished,
            AgentEvent::RunFinished { .. } => EventKind::RunFinished,
            AgentEvent::TokenEstimationFallbacked { .. } => EventKind::TokenEstimationFallbacked,
        }
    }
}

/// The frame an event is relayed in at the actor boundary: kind alongside
/// content, so an external subscriber (an SSE stream, a log sink) doesn't
/// need to re-derive the kind by matching on the payload.
#[derive(Debug, Clone)]
pub struct ActorEvent {
    pub kind: EventKind,
    pub content: AgentEvent,
}

type Handler = Box<dyn Fn(&AgentEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
}

/// Synchronous pub/sub keyed by `EventKind`. A handler that panics is
/// caught and logged; it does not take down dispatch for the remaining
/// subscribers nor unwind into the publisher.
#[derive(Default)]
pub struct EventBus {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a single kind. Dispatch order across
    /// subscribers of the same kind matches subscription order. The
    /// returned id may be passed to `unsubscribe` to detach the handler.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscriptions.lock().unwrap().push(Subscription {
            id,
            kind,
            handler: Box::new(handler),
        });
        id
    }

    /// Detach a previously-registered handler. A no-op if `id` has already
    /// been removed (by a prior `unsubscribe` call, or never existed).
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.lock().unwrap().retain(|sub| sub.id != id);
    }

    /// Register one handler for every kind, sharing a single closure
    /// instance across the registrations. Used by consumers that want the
    /// full ordered event stream (an SSE relay, a test probe) rather than
    /// a specific kind. Returns every per-kind `SubscriptionId`; detach
    /// all of them via `unsubscribe` to fully stop the relay.
    pub fn subscribe_all<F>(&self, handler: F) -> Vec<SubscriptionId>
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        [
            EventKind::StepStarted,
            EventKind::LlmResponseReceived,
            EventKind::ToolCallStarted,
            EventKind::ToolCallFinished,
            EventKind::EmaReplyReceived,
            EventKind::SummarizeMessagesStarted,
            EventKind::SummarizeMessagesFinished,
            EventKind::CreateSummaryFinished,
            EventKind::RunFinished,
            EventKind::TokenEstimationFallbacked,
        ]
        .into_iter()
        .map(|kind| {
            let handler = handler.clone();
            self.subscribe(kind, move |event| handler(event))
        })
        .collect()
    }

    pub fn publish(&self, event: AgentEvent) {
        let kind = event.kind();
        let subscriptions = self.subscriptions.lock().unwrap();
        for sub in subscriptions.iter().filter(|s| s.kind == kind) {
            if catch_unwind(AssertUnwindSafe(|| (sub.handler)(&event))).is_err() {
                tracing::error!(?kind, "event handler panicked");
            }
        }
    }
}
