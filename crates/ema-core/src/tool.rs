//! The `Tool` contract and the registry the agent loop dispatches through.
//!
//! Grounded in `sage_agent.rs`'s `Tool`/`ToolRegistry` pair: a tool is a
//! named, described, schema-carrying async function. The one deliberate
//! departure is the `execute` signature — positional rather than a
//! `HashMap<String, String>` of named string args — because the run loop
//! maps an incoming JSON args object onto tool parameters strictly by the
//! order `parameters()` declares them, then hands the tool its ordered
//! values directly rather than asking it to re-parse a map.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::model::ToolResult;

/// A tool the agent loop can invoke. Implementors should be cheap to
/// clone (wrap heavy state in `Arc`) since the registry hands out
/// `Arc<dyn Tool>` freely.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON-Schema `object` describing accepted arguments. The order of
    /// keys in `properties` is load-bearing: it is the order `execute`
    /// receives its positional `args` in.
    fn parameters(&self) -> Value;

    /// Run the tool. A returned `Err` is caught by the agent loop and
    /// converted into a failing `ToolResult` rather than aborting the run;
    /// implementations should still prefer returning `ToolResult::error`
    /// directly when the failure is expected (bad args, not-found, etc.)
    /// and reserve `Err` for truly exceptional conditions.
    async fn execute(&self, args: &[Value]) -> anyhow::Result<ToolResult>;
}

/// Maps a JSON args object onto the positional order `tool.parameters()`
/// declares. Declared properties missing from `args` become `Value::Null`.
/// If the schema carries no `properties` object, falls back to the
/// insertion order of `args` itself (both maps are order-preserving via
/// serde_json's `preserve_order` feature).
pub fn positional_args(tool: &dyn Tool, args: &Map<String, Value>) -> Vec<Value> {
    let schema = tool.parameters();
    let properties = schema.get("properties").and_then(Value::as_object);

    match properties {
        Some(props) if !props.is_empty() => props
            .keys()
            .map(|key| args.get(key).cloned().unwrap_or(Value::Null))
            .collect(),
        _ => args.values().cloned().collect(),
    }
}

/// Name-indexed collection of tools available to a run.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    /// Rendering passed to the model as part of the system prompt /
    /// tool-use declaration, in the shape `name(args): description`.
    pub fn describe_all(&self) -> String {
        let mut names: Vec<_> = self.tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| {
                let tool = &self.tools[name];
                format!("- {}: {}", tool.name(), tool.description())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its first argument"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "required": ["message"],
            })
        }
        async fn execute(&self, args: &[Value]) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::success(
                args.first().and_then(Value::as_str).unwrap_or_default(),
            ))
        }
    }

    #[test]
    fn registry_round_trips() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        assert!(reg.has("echo"));
        assert!(reg.get("missing").is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn positional_args_follows_schema_order() {
        let tool = EchoTool;
        let mut args = Map::new();
        args.insert("message".to_string(), Value::String("hi".into()));
        let positional = positional_args(&tool, &args);
        assert_eq!(positional, vec![Value::String("hi".into())]);
    }

    #[test]
    fn positional_args_nulls_missing_declared_property() {
        let tool = EchoTool;
        let args = Map::new();
        let positional = positional_args(&tool, &args);
        assert_eq!(positional, vec![Value::Null]);
    }

    #[tokio::test]
    async fn execute_runs() {
        let tool = EchoTool;
        let result = tool
            .execute(&[Value::String("ping".into())])
            .await
            .unwrap();
        assert_eq!(result.content.as_deref(), Some("ping"));
    }
}
