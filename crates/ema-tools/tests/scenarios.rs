//! End-to-end scenarios wiring a real `ActorWorker`/`Agent` to the
//! concrete tools in this crate, backed by scripted `LLMClient` test
//! doubles rather than a live provider.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ema_core::{
    Agent, AgentConfig, ActorStatus, ActorWorker, Content, EventBus, FinishReason, LLMClient,
    LLMResponse, LlmError, Message, Tool, ToolCall, ToolRegistry,
};
use ema_core::store::InMemoryShortTermMemoryDb;
use ema_core::worker::WorkerConfig;
use ema_tools::{DoneTool, EmaReplyTool, REPLY_TOOL_NAME};
use serde_json::Map;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn reply_call(response: &str) -> ToolCall {
    let mut args = Map::new();
    args.insert("response".to_string(), response.into());
    args.insert("expression".to_string(), "neutral".into());
    ToolCall {
        id: Some(Uuid::new_v4().to_string()),
        name: REPLY_TOOL_NAME.to_string(),
        args,
        thought_signature: None,
    }
}

fn model_message(tool_calls: Vec<ToolCall>) -> LLMResponse {
    LLMResponse {
        message: Message::Model {
            content: vec![],
            tool_calls,
        },
        finish_reason: FinishReason::ToolUse,
        total_tokens: Some(50),
    }
}

/// Replies with a fixed string on its first call, then (per spec S1)
/// terminates the run normally with no tool calls on the next.
struct ImmediateReplyLlm {
    response: String,
    calls: AtomicU32,
}

impl ImmediateReplyLlm {
    fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl LLMClient for ImmediateReplyLlm {
    async fn generate(
        &self,
        _messages: &[Message],
        _tools: &[Arc<dyn Tool>],
        _system_prompt: &str,
        _cancel: &CancellationToken,
    ) -> Result<LLMResponse, LlmError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(model_message(vec![reply_call(&self.response)]))
        } else {
            Ok(model_message(vec![]))
        }
    }
}

fn build_worker(
    llm: Arc<dyn LLMClient>,
    db: Arc<InMemoryShortTermMemoryDb>,
) -> ActorWorker {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(EmaReplyTool));
    registry.register(Arc::new(DoneTool));

    let events = Arc::new(EventBus::new());
    let agent = Agent::new(AgentConfig::default(), llm, events.clone());

    ActorWorker::new(
        WorkerConfig {
            actor_id: Uuid::new_v4(),
            base_tools: Arc::new(registry),
            system_prompt_template: "You are a helpful actor.\nRecent activity:\n{MEMORY_BUFFER}"
                .to_string(),
            recent_buffer_size: 10,
        },
        agent,
        events,
        db,
    )
}

async fn wait_until_idle(worker: &ActorWorker) {
    for _ in 0..200 {
        if worker.status().await == ActorStatus::Idle {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("worker never returned to idle");
}

/// S1: a single turn produces exactly one reply and the worker settles
/// back to idle afterwards.
#[tokio::test]
async fn single_turn_reply_settles_to_idle() {
    let db = Arc::new(InMemoryShortTermMemoryDb::new());
    let llm = Arc::new(ImmediateReplyLlm::new("hello there"));
    let worker = build_worker(llm, db);

    worker.work(vec![Content::text("hi")]).await.unwrap();
    wait_until_idle(&worker).await;
}

/// S2: while a run is in flight, a second `work` call preempts it. Since
/// no reply had been produced yet, the run resumes on the next pass
/// rather than starting over from a fresh system prompt.
#[tokio::test]
async fn preemption_before_reply_resumes_same_run() {
    struct StallThenReplyLlm {
        calls: AtomicU32,
        started: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl LLMClient for StallThenReplyLlm {
        async fn generate(
            &self,
            _messages: &[Message],
            _tools: &[Arc<dyn Tool>],
            _system_prompt: &str,
            cancel: &CancellationToken,
        ) -> Result<LLMResponse, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                self.started.notify_one();
                // Block until the preempting Work() call cancels us,
                // mirroring the "never force-interrupt mid-call" rule by
                // cooperatively checking cancellation instead of being
                // killed outright.
                cancel.cancelled().await;
                return Err(LlmError::Cancelled);
            }
            if call == 1 {
                return Ok(model_message(vec![reply_call("caught up")]));
            }
            Ok(model_message(vec![]))
        }
    }

    let db = Arc::new(InMemoryShortTermMemoryDb::new());
    let started = Arc::new(tokio::sync::Notify::new());
    let llm = Arc::new(StallThenReplyLlm {
        calls: AtomicU32::new(0),
        started: started.clone(),
    });
    let worker = build_worker(llm, db);

    worker.work(vec![Content::text("first")]).await.unwrap();
    started.notified().await;

    // This call observes status != idle and preempts the in-flight run.
    worker.work(vec![Content::text("second")]).await.unwrap();

    wait_until_idle(&worker).await;
}

/// S5: a tool call naming a tool that isn't registered produces a failed
/// tool result instead of aborting the run.
#[tokio::test]
async fn unknown_tool_call_does_not_abort_run() {
    struct UnknownThenReplyLlm {
        calls: AtomicU32,
    }

    #[async_trait]
    impl LLMClient for UnknownThenReplyLlm {
        async fn generate(
            &self,
            _messages: &[Message],
            _tools: &[Arc<dyn Tool>],
            _system_prompt: &str,
            _cancel: &CancellationToken,
        ) -> Result<LLMResponse, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                let mut args = Map::new();
                args.insert("x".to_string(), "y".into());
                return Ok(model_message(vec![ToolCall {
                    id: None,
                    name: "nonexistent_tool".to_string(),
                    args,
                    thought_signature: None,
                }]));
            }
            if call == 1 {
                return Ok(model_message(vec![reply_call("handled the error")]));
            }
            Ok(model_message(vec![]))
        }
    }

    let db = Arc::new(InMemoryShortTermMemoryDb::new());
    let llm = Arc::new(UnknownThenReplyLlm {
        calls: AtomicU32::new(0),
    });
    let worker = build_worker(llm, db);

    worker.work(vec![Content::text("do something")]).await.unwrap();
    wait_until_idle(&worker).await;
}

/// S6: recent buffer entries from a prior turn are rendered into the
/// system prompt template for the next fresh run.
#[tokio::test]
async fn recent_buffer_feeds_next_run_system_prompt() {
    struct CapturingLlm {
        captured_prompt: Arc<tokio::sync::Mutex<Option<String>>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LLMClient for CapturingLlm {
        async fn generate(
            &self,
            _messages: &[Message],
            _tools: &[Arc<dyn Tool>],
            system_prompt: &str,
            _cancel: &CancellationToken,
        ) -> Result<LLMResponse, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match call {
                // Turn one: reply, then terminate normally on the next call.
                0 => Ok(model_message(vec![reply_call("ack")])),
                1 => Ok(model_message(vec![])),
                // Turn two's first call: capture the system prompt built
                // from turn one's recent buffer, then finish immediately.
                _ => {
                    *self.captured_prompt.lock().await = Some(system_prompt.to_string());
                    Ok(model_message(vec![]))
                }
            }
        }
    }

    let db = Arc::new(InMemoryShortTermMemoryDb::new());
    let captured_prompt = Arc::new(tokio::sync::Mutex::new(None));
    let llm = Arc::new(CapturingLlm {
        captured_prompt: captured_prompt.clone(),
        calls: AtomicU32::new(0),
    });
    let worker = build_worker(llm, db);

    worker.work(vec![Content::text("first turn")]).await.unwrap();
    wait_until_idle(&worker).await;

    worker.work(vec![Content::text("second turn")]).await.unwrap();
    wait_until_idle(&worker).await;

    let prompt = captured_prompt.lock().await.clone();
    assert!(prompt.is_some());
    assert!(prompt.unwrap().contains("ack"));
}

/// S3: preempting a run that already produced a reply does not resume
/// the in-flight conversation — it starts a fresh `AgentState` seeded
/// from the follow-up input alone.
#[tokio::test]
async fn preemption_after_reply_starts_a_fresh_run() {
    struct ReplyThenStallLlm {
        calls: AtomicU32,
        second_step_started: Arc<tokio::sync::Notify>,
        next_run_messages: Arc<tokio::sync::Mutex<Option<Vec<Message>>>>,
    }

    #[async_trait]
    impl LLMClient for ReplyThenStallLlm {
        async fn generate(
            &self,
            messages: &[Message],
            _tools: &[Arc<dyn Tool>],
            _system_prompt: &str,
            cancel: &CancellationToken,
        ) -> Result<LLMResponse, LlmError> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(model_message(vec![reply_call("first reply")])),
                1 => {
                    // Second step of the first run: already replied once,
                    // so the preempting Work() below must not resume this
                    // conversation.
                    self.second_step_started.notify_one();
                    cancel.cancelled().await;
                    Err(LlmError::Cancelled)
                }
                _ => {
                    *self.next_run_messages.lock().await = Some(messages.to_vec());
                    Ok(model_message(vec![]))
                }
            }
        }
    }

    let db = Arc::new(InMemoryShortTermMemoryDb::new());
    let second_step_started = Arc::new(tokio::sync::Notify::new());
    let next_run_messages = Arc::new(tokio::sync::Mutex::new(None));
    let llm = Arc::new(ReplyThenStallLlm {
        calls: AtomicU32::new(0),
        second_step_started: second_step_started.clone(),
        next_run_messages: next_run_messages.clone(),
    });
    let worker = build_worker(llm, db);

    worker.work(vec![Content::text("first")]).await.unwrap();
    second_step_started.notified().await;

    // This observes status != idle and has_reply_this_run == true, so
    // resume_after_abort must be computed false.
    worker.work(vec![Content::text("follow-up")]).await.unwrap();
    wait_until_idle(&worker).await;

    let messages = next_run_messages
        .lock()
        .await
        .clone()
        .expect("a fresh run must have started after the preemption");
    assert_eq!(
        messages.len(),
        1,
        "fresh AgentState must be seeded from the follow-up input alone"
    );
    assert_eq!(messages[0].flatten_text(), "follow-up");
}
