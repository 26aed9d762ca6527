//! Token-budgeted conversation store with structure-preserving
//! summarization.
//!
//! The shape — a fixed token limit, a flag that needs compaction, add/
//! clear operations — is `memory/context.rs`'s `ContextManager`, with the
//! threshold fraction it used dropped in favor of a strict comparison
//! against the limit itself. The summarization protocol (attempt,
//! fallback to a deterministic rendering on failure) is `memory/
//! compaction.rs`'s `CompactionManager::summarize`, generalized from a
//! single "summarize everything" call into one call per round, each
//! round's real `UserMessage` preserved and only the messages after it
//! collapsed into at most one synthesized summary.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::events::{AgentEvent, EventBus};
use crate::llm::LLMClient;
use crate::model::{LLMResponse, Message};
use crate::token::TokenEstimator;
use crate::tool::ToolRegistry;

const SUMMARY_SYSTEM_PROMPT: &str = "Summarize this agent execution process, focus on tasks and \
tool calls, keep it concise, under 1000 words, exclude user content.";

pub struct ContextManager {
    messages: Vec<Message>,
    tools: Arc<ToolRegistry>,
    token_limit: usize,
    api_total_tokens: usize,
    skip_next_token_check: bool,
    llm: Arc<dyn LLMClient>,
    events: Arc<EventBus>,
    estimator: TokenEstimator,
}

impl ContextManager {
    pub fn new(
        token_limit: usize,
        tools: Arc<ToolRegistry>,
        llm: Arc<dyn LLMClient>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            messages: Vec::new(),
            tools,
            token_limit,
            api_total_tokens: 0,
            skip_next_token_check: false,
            llm,
            events,
            estimator: TokenEstimator::new(),
        }
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn add_user(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn add_model(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn add_tool(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn update_api_tokens(&mut self, response: &LLMResponse) {
        if let Some(total) = response.total_tokens {
            self.api_total_tokens = total;
        }
    }

    /// Local BPE/char-ratio estimate of the current conversation, emitting
    /// `TokenEstimationFallbacked` if the encoder path was unavailable.
    pub fn estimate_tokens(&self) -> usize {
        let estimate = self.estimator.estimate_messages(&self.messages);
        if let Some(reason) = estimate.fallback_reason {
            self.events
                .publish(AgentEvent::TokenEstimationFallbacked { error: reason });
        }
        estimate.tokens
    }

    /// Strict `>` against `token_limit` on either the local estimate or
    /// the last API-reported total — an exact match on the boundary does
    /// not trigger compaction.
    pub fn needs_compaction(&self) -> bool {
        self.estimate_tokens() > self.token_limit || self.api_total_tokens > self.token_limit
    }

    /// Runs the full summarization protocol if the context is over
    /// budget, skipping once if `skip_next_token_check` was armed by a
    /// prior call. Returns whether compaction ran.
    ///
    /// Every original `UserMessage` survives, in order; only the messages
    /// between one user message and the next (a "round") are collapsed
    /// into at most one synthesized summary message.
    pub async fn summarize_if_needed(&mut self, cancel: &CancellationToken) -> bool {
        if self.skip_next_token_check {
            self.skip_next_token_check = false;
            return false;
        }

        let local = self.estimate_tokens();
        if local <= self.token_limit && self.api_total_tokens <= self.token_limit {
            return false;
        }

        let user_indices: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter_map(|(i, m)| matches!(m, Message::User { .. }).then_some(i))
            .collect();
        if user_indices.is_empty() {
            return false;
        }

        let old_tokens = local.max(self.api_total_tokens);
        tracing::info!(
            old_tokens,
            token_limit = self.token_limit,
            rounds = user_indices.len(),
            "context over budget, summarizing"
        );
        self.events.publish(AgentEvent::SummarizeMessagesStarted {
            local_estimated_tokens: local,
            api_reported_tokens: self.api_total_tokens,
            token_limit: self.token_limit,
        });

        // Preserve a single leading non-user prelude message verbatim.
        let mut new_messages = Vec::with_capacity(self.messages.len());
        if user_indices[0] != 0 {
            new_messages.push(self.messages[0].clone());
        }

        let mut summary_count = 0usize;
        for (round_num, &user_idx) in user_indices.iter().enumerate() {
            new_messages.push(self.messages[user_idx].clone());

            let round_end = user_indices
                .get(round_num + 1)
                .copied()
                .unwrap_or(self.messages.len());
            if round_end > user_idx + 1 {
                let round = &self.messages[user_idx + 1..round_end];
                let summary_text = self.summarize_round(round, round_num, cancel).await;
                new_messages.push(Message::user_text(format!(
                    "[Model Execution Summary]\n\n{summary_text}"
                )));
                summary_count += 1;
            }
        }

        self.messages = new_messages;
        self.skip_next_token_check = true;

        let new_tokens = self.estimate_tokens();
        tracing::info!(old_tokens, new_tokens, summary_count, "summarization finished");
        self.events.publish(AgentEvent::SummarizeMessagesFinished {
            ok: true,
            old_tokens: Some(old_tokens),
            new_tokens: Some(new_tokens),
            user_message_count: Some(user_indices.len()),
            summary_count: Some(summary_count),
        });

        true
    }

    async fn summarize_round(
        &self,
        round: &[Message],
        round_num: usize,
        cancel: &CancellationToken,
    ) -> String {
        let round_text = render_round(round);
        let prompt = vec![Message::user_text(round_text.clone())];

        match self
            .llm
            .generate(&prompt, &[], SUMMARY_SYSTEM_PROMPT, cancel)
            .await
        {
            Ok(response) => {
                let text = response.message.flatten_text();
                tracing::debug!(round_num, "round summarized");
                self.events.publish(AgentEvent::CreateSummaryFinished {
                    ok: true,
                    round_num,
                    summary_text: Some(text.clone()),
                    error: None,
                });
                text
            }
            Err(err) => {
                tracing::warn!(round_num, error = %err, "round summary failed, falling back to deterministic rendering");
                let fallback = deterministic_round_summary(round, round_num);
                self.events.publish(AgentEvent::CreateSummaryFinished {
                    ok: false,
                    round_num,
                    summary_text: Some(fallback.clone()),
                    error: Some(err.to_string()),
                });
                fallback
            }
        }
    }
}

/// A round never contains a `UserMessage` (the caller slices strictly
/// between two user indices), so this is just a role-tagged rendering fed
/// to the summarizer LLM as the thing to summarize.
fn render_round(round: &[Message]) -> String {
    round
        .iter()
        .map(|m| match m {
            Message::User { .. } => format!("user: {}", m.flatten_text()),
            Message::Model { .. } => format!("assistant: {}", m.flatten_text()),
            Message::Tool { name, .. } => format!("tool[{name}]: {}", m.flatten_text()),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

const PREVIEW_LEN: usize = 200;

fn truncate_preview(text: &str) -> &str {
    let mut end = text.len().min(PREVIEW_LEN);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Used only when the summarizer LLM call for a round fails: a mechanical,
/// information-preserving rendering rather than a narrative summary.
/// `"Round N execution process:"` followed by one line per assistant
/// message (plus any tools it called) and one per tool result.
fn deterministic_round_summary(round: &[Message], round_num: usize) -> String {
    let mut lines = vec![format!("Round {} execution process:\n", round_num + 1)];
    for message in round {
        match message {
            Message::User { .. } => {}
            Message::Model { tool_calls, .. } => {
                lines.push(format!("Assistant: {}", message.flatten_text()));
                if !tool_calls.is_empty() {
                    let names = tool_calls
                        .iter()
                        .map(|call| call.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ");
                    lines.push(format!("  \u{2192} Called tools: {names}"));
                }
            }
            Message::Tool { result, .. } => {
                let preview = result.content.as_deref().or(result.error.as_deref()).unwrap_or("");
                lines.push(format!(
                    "  \u{2190} Tool returned: {}\u{2026}",
                    truncate_preview(preview)
                ));
            }
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::model::{FinishReason, LLMResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StubLlm {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LLMClient for StubLlm {
        async fn generate(
            &self,
            _messages: &[Message],
            _tools: &[Arc<dyn crate::tool::Tool>],
            _system_prompt: &str,
            _cancel: &CancellationToken,
        ) -> Result<LLMResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LlmError::Other(anyhow::anyhow!("stub failure")));
            }
            Ok(LLMResponse {
                message: Message::user_text("stub summary"),
                finish_reason: FinishReason::Stop,
                total_tokens: Some(10),
            })
        }
    }

    #[test]
    fn needs_compaction_is_a_strict_boundary() {
        let llm = Arc::new(StubLlm {
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let mut ctx = ContextManager::new(
            1000,
            Arc::new(ToolRegistry::new()),
            llm,
            Arc::new(EventBus::new()),
        );
        ctx.api_total_tokens = 1000;
        assert!(!ctx.needs_compaction(), "exact match must not trigger");
        ctx.api_total_tokens = 1001;
        assert!(ctx.needs_compaction());
    }

    #[tokio::test]
    async fn summarize_if_needed_skips_once_after_flag_set() {
        let llm = Arc::new(StubLlm {
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let mut ctx = ContextManager::new(
            100,
            Arc::new(ToolRegistry::new()),
            llm,
            Arc::new(EventBus::new()),
        );
        ctx.skip_next_token_check = true;
        ctx.api_total_tokens = 1000;
        let cancel = CancellationToken::new();
        assert!(!ctx.summarize_if_needed(&cancel).await);
        assert!(ctx.needs_compaction());
    }

    #[tokio::test]
    async fn summarize_preserves_every_user_message_in_order() {
        let llm = Arc::new(StubLlm {
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let mut ctx = ContextManager::new(
            100,
            Arc::new(ToolRegistry::new()),
            llm,
            Arc::new(EventBus::new()),
        )
        .with_messages(vec![
            Message::user_text("one"),
            Message::Model {
                content: vec![],
                tool_calls: vec![],
            },
            Message::user_text("two"),
            Message::Model {
                content: vec![],
                tool_calls: vec![],
            },
            Message::user_text("three"),
        ]);
        ctx.api_total_tokens = 1000;
        let cancel = CancellationToken::new();
        assert!(ctx.summarize_if_needed(&cancel).await);

        // "one" and "two" each had a trailing model message to collapse;
        // "three" is the last message and has nothing after it.
        assert_eq!(ctx.messages.len(), 5);
        let user_texts: Vec<_> = ctx
            .messages
            .iter()
            .filter(|m| matches!(m, Message::User { .. }) && !m.flatten_text().starts_with("[Model Execution Summary]"))
            .map(Message::flatten_text)
            .collect();
        assert_eq!(user_texts, vec!["one", "two", "three"]);
        assert!(ctx.messages[1]
            .flatten_text()
            .starts_with("[Model Execution Summary]"));
        assert!(ctx.messages[3]
            .flatten_text()
            .starts_with("[Model Execution Summary]"));
    }

    #[tokio::test]
    async fn summarize_is_noop_with_no_user_messages() {
        let llm = Arc::new(StubLlm {
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let mut ctx = ContextManager::new(
            100,
            Arc::new(ToolRegistry::new()),
            llm,
            Arc::new(EventBus::new()),
        )
        .with_messages(vec![Message::Model {
            content: vec![crate::model::Content::text("no user turn yet")],
            tool_calls: vec![],
        }]);
        ctx.api_total_tokens = 1000;
        let cancel = CancellationToken::new();
        assert!(!ctx.summarize_if_needed(&cancel).await);
        assert_eq!(ctx.messages.len(), 1);
    }

    #[tokio::test]
    async fn summarize_falls_back_deterministically_on_llm_failure() {
        let llm = Arc::new(StubLlm {
            fail: true,
            calls: AtomicUsize::new(0),
        });
        let mut ctx = ContextManager::new(
            100,
            Arc::new(ToolRegistry::new()),
            llm,
            Arc::new(EventBus::new()),
        )
        .with_messages(vec![
            Message::user_text("hello there"),
            Message::Model {
                content: vec![crate::model::Content::text("on it")],
                tool_calls: vec![],
            },
        ]);
        ctx.api_total_tokens = 1000;
        let cancel = CancellationToken::new();
        assert!(ctx.summarize_if_needed(&cancel).await);
        assert_eq!(ctx.messages.len(), 2);
        assert_eq!(ctx.messages[0].flatten_text(), "hello there");
        assert!(ctx.messages[1]
            .flatten_text()
            .contains("Round 1 execution process"));
        assert!(ctx.messages[1].flatten_text().contains("Assistant: on it"));
    }
}
