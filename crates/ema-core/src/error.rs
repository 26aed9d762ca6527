use thiserror::Error;

/// Errors surfaced at the `ActorWorker` boundary: malformed input or
/// misconfiguration the caller is expected to fix, not a mid-run failure.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("invalid input: {0}")]
    InputValidation(String),
}

/// Errors an `LLMClient::generate` call can return.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("generation cancelled")]
    Cancelled,

    #[error("retries exhausted after {attempts} attempt(s)")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
