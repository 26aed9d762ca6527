//! Core library for a conversational actor runtime: a per-(user, actor)
//! worker that mediates between inbound input and an LLM backend through
//! a step-bounded, tool-using agent loop with a token-budgeted,
//! self-summarizing conversation store.

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod llm;
pub mod model;
pub mod schema;
pub mod store;
pub mod token;
pub mod tool;
pub mod worker;

pub use agent::{Agent, AgentConfig, AgentState, RunOutcome};
pub use config::Config;
pub use context::ContextManager;
pub use error::{CoreError, LlmError};
pub use events::{ActorEvent, AgentEvent, EventBus, EventKind, SubscriptionId};
pub use llm::LLMClient;
pub use model::{
    ActorStatus, BufferKind, BufferMessage, Content, FinishReason, LLMResponse, Message, Reply,
    ToolCall, ToolResult,
};
pub use token::TokenEstimator;
pub use tool::{positional_args, Tool, ToolRegistry};
pub use worker::{ActorWorker, WorkerConfig};
