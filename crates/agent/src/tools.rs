use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use concierge_llm::FunctionDeclaration;
use concierge_mcp::RemoteTool;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

/// A function the model may call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;

    async fn execute(&self, input: Value) -> Result<Value>;

    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolRegistryError {
    #[error("tool name must not be empty")]
    EmptyName,
    #[error("tool `{0}` is registered twice")]
    Duplicate(String),
}

/// Tools in registration order, looked up by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T) -> Result<(), ToolRegistryError>
    where
        T: Tool + 'static,
    {
        self.register_shared(Arc::new(tool))
    }

    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolRegistryError> {
        let name = tool.name().to_string();
        if name.trim().is_empty() {
            return Err(ToolRegistryError::EmptyName);
        }
        if self.index.contains_key(&name) {
            return Err(ToolRegistryError::Duplicate(name));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&position| Arc::clone(&self.tools[position]))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        self.tools.iter().map(|tool| tool.declaration()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Exposes a tool discovered on an MCP server to the model.
///
/// Successful results come back as `{"result": ...}`, where a text result
/// that parses as JSON is returned parsed. Errors reported by the tool become
/// `{"error": ...}`. Connection failures are returned as `Err`.
pub struct McpTool {
    server: String,
    remote: RemoteTool,
}

impl McpTool {
    pub fn new(server: impl Into<String>, remote: RemoteTool) -> Self {
        Self { server: server.into(), remote }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        self.remote.name()
    }

    fn description(&self) -> &str {
        self.remote.description()
    }

    fn parameters(&self) -> Value {
        self.remote.input_schema().clone()
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        debug!(
            event_name = "agent.tool.mcp_call",
            server = %self.server,
            tool = %self.remote.name(),
            "calling remote tool"
        );

        let result = self.remote.call(input).await?;
        let text = result.joined_text();
        if result.is_error {
            return Ok(json!({ "error": text }));
        }

        let value = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        Ok(json!({ "result": value }))
    }
}

/// Wraps every discovered tool and registers it. Returns how many were added.
pub fn register_mcp_tools(
    registry: &mut ToolRegistry,
    server: &str,
    tools: impl IntoIterator<Item = RemoteTool>,
) -> Result<usize, ToolRegistryError> {
    let mut added = 0;
    for remote in tools {
        registry.register(McpTool::new(server, remote))?;
        added += 1;
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::{Tool, ToolRegistry, ToolRegistryError};

    struct Echo(&'static str);

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "echoes its input"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn execute(&self, input: Value) -> Result<Value> {
            Ok(input)
        }
    }

    #[test]
    fn registry_keeps_registration_order() {
        let mut registry = ToolRegistry::default();
        registry.register(Echo("zeta")).expect("zeta");
        registry.register(Echo("alpha")).expect("alpha");

        assert_eq!(registry.names(), ["zeta", "alpha"]);
        assert_eq!(registry.len(), 2);
        let declarations = registry.declarations();
        assert_eq!(declarations[1].name, "alpha");
        assert_eq!(declarations[1].description, "echoes its input");
        assert_eq!(declarations[1].parameters["properties"]["text"]["type"], "string");
    }

    #[test]
    fn duplicate_and_empty_names_are_rejected() {
        let mut registry = ToolRegistry::default();
        registry.register(Echo("echo")).expect("first");

        assert_eq!(
            registry.register(Echo("echo")),
            Err(ToolRegistryError::Duplicate("echo".to_string()))
        );
        assert_eq!(registry.register(Echo(" ")), Err(ToolRegistryError::EmptyName));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn lookup_returns_a_callable_tool() {
        let mut registry = ToolRegistry::default();
        registry.register(Echo("echo")).expect("register");

        let tool = registry.get("echo").expect("found");
        assert_eq!(tool.execute(json!({"text": "hi"})).await.expect("runs"), json!({"text": "hi"}));
        assert!(registry.get("missing").is_none());
    }
}
