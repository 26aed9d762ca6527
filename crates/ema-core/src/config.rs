use anyhow::{Context, Result};

/// Process-wide configuration, read once at startup the same way `sage`'s
/// own `Config::from_env` does: required fields `.context(...)`-wrapped,
/// optional fields fall back to a sane default.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    /// Maximum steps a single agent run is allowed before it is forced to
    /// stop without a reply.
    pub max_steps: u32,

    /// Token budget a `ContextManager` compacts against.
    pub token_limit: usize,

    /// Name of the distinguished reply tool, in case a deployment needs
    /// to rename it.
    pub reply_tool_name: String,

    /// Workspace directory illustrative tools (e.g. the shell tool) are
    /// confined to.
    pub workspace_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,

            max_steps: std::env::var("EMA_MAX_STEPS")
                .unwrap_or_else(|_| "12".to_string())
                .parse()
                .context("EMA_MAX_STEPS must be a valid integer")?,

            token_limit: std::env::var("EMA_TOKEN_LIMIT")
                .unwrap_or_else(|_| "256000".to_string())
                .parse()
                .context("EMA_TOKEN_LIMIT must be a valid integer")?,

            reply_tool_name: std::env::var("EMA_REPLY_TOOL_NAME")
                .unwrap_or_else(|_| "ema_reply".to_string()),

            workspace_path: std::env::var("EMA_WORKSPACE")
                .unwrap_or_else(|_| "/workspace".to_string()),
        })
    }
}
