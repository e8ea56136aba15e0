use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::{
    CallToolRequestParam, Content, Implementation, ListToolsResult, PaginatedRequestParam,
    ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::protocol::{implementation, ToolDefinition, PROTOCOL_VERSION};

#[derive(Debug, Error)]
pub enum ToolCallError {
    /// Reported to the caller as a JSON-RPC invalid-params error.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// Reported inside the tool result with `isError: true`.
    #[error("{0}")]
    Failed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutput {
    Json(Value),
    Text(String),
}

impl ToolOutput {
    pub fn into_result(self) -> rmcp::model::CallToolResult {
        let text = match self {
            Self::Text(text) => text,
            Self::Json(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
        };
        rmcp::model::CallToolResult::success(vec![Content::text(text)])
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolCallError>;
}

/// Deserializes tool arguments into a typed struct.
pub fn parse_arguments<T: DeserializeOwned>(arguments: Map<String, Value>) -> Result<T, ToolCallError> {
    serde_json::from_value(Value::Object(arguments))
        .map_err(|error| ToolCallError::InvalidArguments(error.to_string()))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServerBuildError {
    #[error("tool `{0}` is registered more than once")]
    DuplicateTool(String),
    #[error("tool names must not be empty")]
    EmptyToolName,
}

pub struct ToolServerBuilder {
    info: Implementation,
    instructions: Option<String>,
    handlers: Vec<Arc<dyn ToolHandler>>,
}

impl ToolServerBuilder {
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn tool(mut self, handler: impl ToolHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<ToolServer, ServerBuildError> {
        let mut index = HashMap::with_capacity(self.handlers.len());
        let mut definitions = Vec::with_capacity(self.handlers.len());

        for (position, handler) in self.handlers.iter().enumerate() {
            let definition = handler.definition();
            if definition.name.trim().is_empty() {
                return Err(ServerBuildError::EmptyToolName);
            }
            if index.insert(definition.name.clone(), position).is_some() {
                return Err(ServerBuildError::DuplicateTool(definition.name));
            }
            definitions.push(definition);
        }

        let tools = definitions.iter().map(ToolDefinition::to_tool).collect();
        Ok(ToolServer {
            registry: Arc::new(Registry {
                info: self.info,
                instructions: self.instructions,
                handlers: self.handlers,
                definitions,
                tools,
                index,
            }),
        })
    }
}

struct Registry {
    info: Implementation,
    instructions: Option<String>,
    handlers: Vec<Arc<dyn ToolHandler>>,
    definitions: Vec<ToolDefinition>,
    tools: Vec<Tool>,
    index: HashMap<String, usize>,
}

/// Transport-independent MCP tool server. Clones share one registry, so each
/// connection gets its own handle.
#[derive(Clone)]
pub struct ToolServer {
    registry: Arc<Registry>,
}

impl ToolServer {
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> ToolServerBuilder {
        ToolServerBuilder { info: implementation(name, version), instructions: None, handlers: Vec::new() }
    }

    pub fn info(&self) -> &Implementation {
        &self.registry.info
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.registry.definitions
    }

    /// Runs one tool. Unknown tools and rejected arguments are protocol
    /// errors; a handler failure is a result with `isError` set.
    pub async fn call(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<rmcp::model::CallToolResult, McpError> {
        let Some(&position) = self.registry.index.get(name) else {
            return Err(McpError::invalid_params(format!("Unknown tool: {name}"), None));
        };

        info!(event_name = "mcp.server.tool_call", tool = %name, "calling tool");
        match self.registry.handlers[position].call(arguments).await {
            Ok(output) => Ok(output.into_result()),
            Err(ToolCallError::InvalidArguments(detail)) => {
                warn!(
                    event_name = "mcp.server.tool_invalid_arguments",
                    tool = %name,
                    detail = %detail,
                    "rejected tool arguments"
                );
                Err(McpError::invalid_params(format!("Invalid arguments for tool {name}: {detail}"), None))
            }
            Err(ToolCallError::Failed(message)) => {
                warn!(
                    event_name = "mcp.server.tool_failed",
                    tool = %name,
                    error = %message,
                    "tool reported an error"
                );
                Ok(rmcp::model::CallToolResult::error(vec![Content::text(message)]))
            }
        }
    }
}

impl ServerHandler for ToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: PROTOCOL_VERSION,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: self.registry.info.clone(),
            instructions: self.registry.instructions.clone(),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.registry.tools.clone()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<rmcp::model::CallToolResult, McpError> {
        self.call(&request.name, request.arguments.unwrap_or_default()).await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use rmcp::model::ErrorCode;
    use rmcp::ServerHandler;
    use serde::Deserialize;
    use serde_json::{json, Map, Value};

    use super::{parse_arguments, ServerBuildError, ToolCallError, ToolHandler, ToolOutput, ToolServer};
    use crate::protocol::{CallToolResult, ToolDefinition};

    struct Echo;

    #[derive(Deserialize)]
    struct EchoArgs {
        text: String,
    }

    #[async_trait]
    impl ToolHandler for Echo {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".to_string(),
                description: "Echo text back".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
            }
        }

        async fn call(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolCallError> {
            let args: EchoArgs = parse_arguments(arguments)?;
            if args.text == "boom" {
                return Err(ToolCallError::Failed("upstream exploded".to_string()));
            }
            Ok(ToolOutput::Json(json!({"echo": args.text})))
        }
    }

    fn server() -> ToolServer {
        ToolServer::builder("echo-server", "0.1.0")
            .instructions("Echoes text.")
            .tool(Echo)
            .build()
            .expect("server builds")
    }

    fn arguments(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn info_advertises_tools_and_instructions() {
        let info = server().get_info();

        assert!(info.capabilities.tools.is_some());
        assert_eq!(info.server_info.name, "echo-server");
        assert_eq!(info.server_info.version, "0.1.0");
        assert_eq!(info.instructions.as_deref(), Some("Echoes text."));
    }

    #[tokio::test]
    async fn tool_output_is_pretty_json_text() {
        let result = server().call("echo", arguments(json!({"text": "hi"}))).await.expect("call succeeds");
        let result = CallToolResult::from(result);

        assert!(!result.is_error);
        assert_eq!(serde_json::from_str::<Value>(&result.joined_text()).expect("json"), json!({"echo": "hi"}));
    }

    #[tokio::test]
    async fn handler_failure_is_a_tool_error_not_a_protocol_error() {
        let result = server().call("echo", arguments(json!({"text": "boom"}))).await.expect("protocol-level success");
        let result = CallToolResult::from(result);

        assert!(result.is_error);
        assert_eq!(result.joined_text(), "upstream exploded");
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments_are_invalid_params() {
        let unknown = server().call("nope", Map::new()).await.expect_err("unknown tool");
        assert_eq!(unknown.code, ErrorCode::INVALID_PARAMS);
        assert!(unknown.message.contains("nope"));

        let bad = server().call("echo", Map::new()).await.expect_err("missing text");
        assert_eq!(bad.code, ErrorCode::INVALID_PARAMS);
    }

    #[test]
    fn definitions_follow_registration_order() {
        let server = server();
        assert_eq!(server.definitions()[0].name, "echo");
        assert_eq!(server.definitions()[0].input_schema["required"][0], "text");
    }

    #[test]
    fn duplicate_tool_names_are_rejected() {
        let result = ToolServer::builder("dup", "0.1.0").tool(Echo).tool(Echo).build();
        assert_eq!(result.err(), Some(ServerBuildError::DuplicateTool("echo".to_string())));
    }
}
