//! The model-backend collaborator interface.
//!
//! Generalizes `sage_agent.rs`'s DSRs-predictor call (a fixed BAML
//! signature, retried and corrected in-line) into a provider-agnostic
//! `generate` contract, and threads a `CancellationToken` through it the
//! way `steer-core`'s `AgentExecutor::run` checks cancellation before each
//! call to its API client.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::LlmError;
use crate::model::{LLMResponse, Message};
use crate::tool::Tool;

/// A chat-completion backend. Implementations own retry policy around
/// transient provider errors internally and surface only
/// `LlmError::RetryExhausted` once exhausted; `Cancelled` is returned
/// promptly once `cancel` fires instead of completing a request already
/// in flight when possible.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn generate(
        &self,
        messages: &[Message],
        tools: &[std::sync::Arc<dyn Tool>],
        system_prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<LLMResponse, LlmError>;
}

/// Renders a tool's JSON-Schema `parameters()` the way most providers
/// expect a function declaration, reused by `LLMClient` implementations
/// that need to build a provider-specific tool-use payload.
pub fn tool_declaration(tool: &dyn Tool) -> Value {
    serde_json::json!({
        "name": tool.name(),
        "description": tool.description(),
        "parameters": tool.parameters(),
    })
}
