//! No-op signal tool.
//!
//! Straight generalization of `tools.rs`'s `DoneTool`: same name,
//! description and "use only when nothing else is needed" convention,
//! adapted to the positional `Tool` contract.

use async_trait::async_trait;
use ema_core::{Tool, ToolResult};
use serde_json::{json, Value};

pub struct DoneTool;

#[async_trait]
impl Tool for DoneTool {
    fn name(&self) -> &str {
        "done"
    }

    fn description(&self) -> &str {
        "No-op signal. Use ONLY when no other tool call is needed this turn."
    }

    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: &[Value]) -> anyhow::Result<ToolResult> {
        Ok(ToolResult::success("Done."))
    }
}
