//! Wire-level and in-memory data model shared by the agent loop, the
//! context manager and the actor worker.
//!
//! Every type here is intentionally thin: a tagged enum or a plain struct
//! with public fields. The behavior lives in `agent`, `context` and
//! `worker`; this module only fixes the shapes they pass around.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use uuid::Uuid;

/// A single piece of message content. Text-only today; the tag exists so a
/// future image/audio variant does not require touching every call site
/// that matches on `Content`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Content {
    Text { text: String },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    /// Best-effort flattening used by the token estimator and by buffer
    /// rendering; non-text variants stringify as an empty placeholder
    /// rather than panicking.
    pub fn as_text(&self) -> &str {
        match self {
            Content::Text { text } => text,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    pub id: Option<String>,
    pub name: String,
    pub args: Map<String, serde_json::Value>,
    /// Opaque provider continuation token (e.g. Gemini's thought signature).
    /// Carried verbatim; never inspected by core logic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

/// The outcome of executing a `ToolCall`.
///
/// Invariant: `success` implies `content.is_some() && error.is_none()`, and
/// `!success` implies `error.is_some() && content.is_none()`. Constructors
/// are the only place this invariant needs to be proven.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(error.into()),
        }
    }
}

/// One entry in a conversation. The tag distinguishes who produced it and
/// what it carries; `ModelMessage` additionally carries the tool calls the
/// model asked for in that turn, `ToolMessage` carries the results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        content: Vec<Content>,
    },
    Model {
        content: Vec<Content>,
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: Option<String>,
        name: String,
        result: ToolResult,
    },
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Message::User {
            content: vec![Content::text(text)],
        }
    }

    /// Concatenated text across every `Content` block this message carries,
    /// joined with newlines. Used by the deterministic summarization
    /// fallback rendering.
    pub fn flatten_text(&self) -> String {
        match self {
            Message::User { content } | Message::Model { content, .. } => content
                .iter()
                .map(Content::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
            Message::Tool { result, .. } => result
                .content
                .clone()
                .or_else(|| result.error.clone())
                .unwrap_or_default(),
        }
    }

    /// Text fed to the token estimator: content text plus a stringified
    /// rendering of tool calls (`Model`) or the tool result (`Tool`), so
    /// the estimate accounts for the JSON a provider actually bills for
    /// rather than just the prose.
    pub fn estimator_text(&self) -> String {
        match self {
            Message::Model { tool_calls, .. } if !tool_calls.is_empty() => {
                let calls = serde_json::to_string(tool_calls).unwrap_or_default();
                format!("{}\n{calls}", self.flatten_text())
            }
            Message::Tool { result, .. } => {
                serde_json::to_string(result).unwrap_or_else(|_| self.flatten_text())
            }
            _ => self.flatten_text(),
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolUse,
    MaxTokens,
    Other,
}

impl FinishReason {
    /// The `snake_case` wire form, also used wherever a finish reason needs
    /// to be carried as a plain string (e.g. `RunFinished`'s `msg` field).
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::ToolUse => "tool_use",
            FinishReason::MaxTokens => "max_tokens",
            FinishReason::Other => "other",
        }
    }
}

/// A single call to an `LLMClient`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LLMResponse {
    pub message: Message,
    pub finish_reason: FinishReason,
    /// Total tokens the provider reports for the request + response, used
    /// to keep `ContextManager`'s running estimate anchored to ground
    /// truth whenever the provider supplies one.
    pub total_tokens: Option<usize>,
}

/// The distinguished reply payload. A successful call to the reply tool is
/// intercepted by the agent loop and parsed into this shape before the
/// run is allowed to terminate on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reply {
    pub think: String,
    pub expression: String,
    pub action: String,
    pub response: String,
}

/// One entry appended to an actor's durable buffer. Buffer writes are
/// serialized (see `worker::BufferChain`) but the record itself is plain
/// data, independent of how it gets persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BufferMessage {
    pub kind: BufferKind,
    pub id: Uuid,
    pub name: String,
    pub contents: Vec<Content>,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BufferKind {
    User,
    Actor,
}

/// The externally-observable state of a single actor's worker loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorStatus {
    Idle,
    Preparing,
    Running,
}
