//! The step-bounded tool-using loop.
//!
//! Grounded in `sage_agent.rs`'s `SageAgent::step`/`process_message` (the
//! bounded loop, the per-step tool dispatch, the "done tool" convention
//! for early termination) and in `steer-core`'s `AgentExecutor::run` (the
//! cancellation check before each model call, never mid-tool). The
//! reply-tool interception and the typed event emission around every
//! step are additions this spec asks for that the teacher's loop doesn't
//! have — it only ever returns its accumulated messages.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::context::ContextManager;
use crate::events::{AgentEvent, EventBus};
use crate::llm::LLMClient;
use crate::model::{Message, Reply};
use crate::tool::{positional_args, ToolRegistry};

/// Mutable run state handed to `Agent::run`. Created fresh by the worker
/// when a new run starts, and simply reused (not recreated) when a
/// preempted run is resumed without ever having produced a reply — see
/// `worker::ActorWorker` for that decision.
#[derive(Clone)]
pub struct AgentState {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Arc<ToolRegistry>,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_steps: u32,
    pub token_limit: usize,
    /// Name of the distinguished reply tool. A successful call to a tool
    /// with this name fires `AgentEvent::EmaReplyReceived` but, on its
    /// own, does not end the run — see `RunOutcome`.
    pub reply_tool_name: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 12,
            token_limit: 256_000,
            reply_tool_name: "ema_reply".to_string(),
        }
    }
}

/// How a run ended. A reply is not a run outcome in its own right — see
/// `AgentEvent::EmaReplyReceived`, which can fire any number of times
/// (or zero) before the run reaches one of these terminal states.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Finished { message: Option<String> },
    StepLimitReached,
    Cancelled,
    Error(String),
}

pub struct Agent {
    config: AgentConfig,
    llm: Arc<dyn LLMClient>,
    events: Arc<EventBus>,
}

impl Agent {
    pub fn new(config: AgentConfig, llm: Arc<dyn LLMClient>, events: Arc<EventBus>) -> Self {
        Self {
            config,
            llm,
            events,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    #[instrument(skip_all, fields(max_steps = self.config.max_steps))]
    pub async fn run(&self, state: &mut AgentState, cancel: CancellationToken) -> RunOutcome {
        let mut context = ContextManager::new(
            self.config.token_limit,
            state.tools.clone(),
            self.llm.clone(),
            self.events.clone(),
        )
        .with_messages(std::mem::take(&mut state.messages));

        let outcome = self.run_loop(state, &mut context, &cancel).await;

        state.messages = context.into_messages();
        outcome
    }

    async fn run_loop(
        &self,
        state: &AgentState,
        context: &mut ContextManager,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        for step in 1..=self.config.max_steps {
            if cancel.is_cancelled() {
                tracing::info!(step, "run cancelled before step");
                return self.finish_cancelled();
            }

            tracing::debug!(step, max_steps = self.config.max_steps, "agent step");

            context.summarize_if_needed(cancel).await;

            self.events.publish(AgentEvent::StepStarted {
                step,
                max_steps: self.config.max_steps,
            });

            let tools: Vec<_> = context.tools().iter().cloned().collect();
            let response = match self
                .llm
                .generate(context.messages(), &tools, &state.system_prompt, cancel)
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    if matches!(err, crate::error::LlmError::Cancelled) {
                        return self.finish_cancelled();
                    }
                    let message = err.to_string();
                    self.events.publish(AgentEvent::RunFinished {
                        ok: false,
                        msg: None,
                        error: Some(message.clone()),
                    });
                    return RunOutcome::Error(message);
                }
            };

            context.update_api_tokens(&response);
            self.events.publish(AgentEvent::LlmResponseReceived {
                response: response.clone(),
            });

            let tool_calls = match &response.message {
                Message::Model { tool_calls, .. } => tool_calls.clone(),
                _ => Vec::new(),
            };
            context.add_model(response.message.clone());

            if tool_calls.is_empty() {
                let message = response.message.flatten_text();
                tracing::info!(step, "run finished with a plain message, no tool calls");
                self.events.publish(AgentEvent::RunFinished {
                    ok: true,
                    msg: Some(response.finish_reason.as_str().to_string()),
                    error: None,
                });
                return RunOutcome::Finished {
                    message: Some(message),
                };
            }

            for call in tool_calls {
                tracing::info!(tool = %call.name, args = ?call.args, "executing tool");
                self.events.publish(AgentEvent::ToolCallStarted {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args: call.args.clone(),
                });

                let result = match state.tools.get(&call.name) {
                    None => {
                        tracing::warn!(tool = %call.name, "unknown tool");
                        crate::model::ToolResult::error(format!("Unknown tool: {}", call.name))
                    }
                    Some(tool) => {
                        let args = positional_args(tool.as_ref(), &call.args);
                        match tool.execute(&args).await {
                            Ok(result) => {
                                tracing::debug!(tool = %call.name, success = result.success, "tool result");
                                result
                            }
                            Err(err) => {
                                tracing::error!(tool = %call.name, error = %err, "tool execution failed");
                                crate::model::ToolResult::error(
                                    err.chain()
                                        .map(|cause| cause.to_string())
                                        .collect::<Vec<_>>()
                                        .join("\ncaused by: "),
                                )
                            }
                        }
                    }
                };

                let is_reply = call.name == self.config.reply_tool_name && result.success;
                let parsed_reply = is_reply
                    .then(|| result.content.as_deref().map(serde_json::from_str::<Reply>))
                    .flatten();

                // Spec §4.3 step 7: d. emit ReplyReceived (and clear the
                // recorded content) before e. ToolCallFinished — S1 pins
                // the exact sequence toolCallStarted, emaReplyReceived,
                // toolCallFinished.
                match &parsed_reply {
                    Some(Ok(reply)) => {
                        // A reply does not itself end the run — the spec's
                        // S1 scenario calls the model again afterwards and
                        // only terminates when it returns a message with no
                        // tool calls. `EmaReplyReceived` is the sole signal
                        // a reply happened; callers that care about run
                        // completion watch for `RunFinished` separately.
                        tracing::info!(step, "reply tool call succeeded");
                        self.events
                            .publish(AgentEvent::EmaReplyReceived { reply: reply.clone() });
                    }
                    Some(Err(_)) => {
                        // Malformed reply payload: treat as a regular tool
                        // result and let the loop continue instead of
                        // aborting the run.
                        tracing::warn!(
                            tool = %call.name,
                            "reply tool succeeded but payload did not parse as Reply"
                        );
                    }
                    None => {}
                }

                // A successful reply's content must not re-enter the
                // context: clear it before the `ToolMessage` is appended,
                // so the payload can't be re-ingested on the next step.
                let recorded_result = match &parsed_reply {
                    Some(Ok(_)) => crate::model::ToolResult {
                        content: None,
                        ..result.clone()
                    },
                    _ => result.clone(),
                };
                self.events.publish(AgentEvent::ToolCallFinished {
                    ok: result.success,
                    id: call.id.clone(),
                    name: call.name.clone(),
                    result: result.clone(),
                });
                context.add_tool(Message::Tool {
                    tool_call_id: call.id.clone(),
                    name: call.name.clone(),
                    result: recorded_result,
                });
            }
        }

        self.events.publish(AgentEvent::RunFinished {
            ok: false,
            msg: None,
            error: Some("step limit reached".to_string()),
        });
        RunOutcome::StepLimitReached
    }

    fn finish_cancelled(&self) -> RunOutcome {
        self.events.publish(AgentEvent::RunFinished {
            ok: false,
            msg: None,
            error: Some("cancelled".to_string()),
        });
        RunOutcome::Cancelled
    }
}
