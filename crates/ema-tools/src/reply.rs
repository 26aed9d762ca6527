//! The distinguished reply tool.
//!
//! Every other tool here is a straight generalization of something the
//! teacher already had; this one has no teacher counterpart because
//! `sage_agent.rs`'s loop decides a turn is over by a structured
//! `AgentResponse.messages == []` field on its typed LLM output, not by a
//! tool call. This spec instead routes "the run is over, here is what to
//! tell the user" through an ordinary tool call so the agent loop has a
//! single dispatch path (`run_loop`'s per-call `execute`) rather than two
//! (a typed-output branch and a tool-call branch). The payload shape
//! (`think`/`expression`/`action`/`response`) and the schema-declaration
//! style are grounded in `tools.rs`'s `canonical_tool_descriptions`
//! table — one static, thoroughly-described tool entry.

use async_trait::async_trait;
use ema_core::{Tool, ToolResult};
use serde_json::{json, Value};

/// The name the agent loop is configured (by default) to intercept. Keep
/// this in sync with `AgentConfig::reply_tool_name` / `EMA_REPLY_TOOL_NAME`.
pub const REPLY_TOOL_NAME: &str = "ema_reply";

/// Implements the reply contract by echoing its structured arguments back
/// as the tool's JSON content — the agent loop parses that content into a
/// `Reply` once it sees a successful call to this tool's name. The tool
/// itself does no validation beyond requiring `response`; the loop
/// tolerates a malformed payload by logging and continuing rather than
/// aborting the run.
pub struct EmaReplyTool;

#[async_trait]
impl Tool for EmaReplyTool {
    fn name(&self) -> &str {
        REPLY_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Send a reply to the user and end this turn. Always call this exactly once \
         when you are ready to respond — it is the only way a run produces visible \
         output. `think` is your private reasoning, `expression` is a short mood/tone \
         label, `action` names any physical gesture implied, and `response` is the \
         text actually shown to the user."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "think": { "type": "string", "description": "private reasoning, not shown to the user" },
                "expression": { "type": "string", "description": "short mood/tone label" },
                "action": { "type": "string", "description": "physical gesture implied by the reply, if any" },
                "response": { "type": "string", "description": "the text shown to the user" },
            },
            "required": ["response"],
        })
    }

    async fn execute(&self, args: &[Value]) -> anyhow::Result<ToolResult> {
        let get = |i: usize| args.get(i).and_then(Value::as_str).unwrap_or_default();
        let response = get(3);
        if response.is_empty() {
            return Ok(ToolResult::error("'response' argument is required"));
        }

        let payload = json!({
            "think": get(0),
            "expression": get(1),
            "action": get(2),
            "response": response,
        });
        Ok(ToolResult::success(payload.to_string()))
    }
}
