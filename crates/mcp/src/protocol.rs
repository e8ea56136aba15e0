use std::fmt;
use std::sync::Arc;

use rmcp::model::{ClientJsonRpcMessage, ErrorData, Implementation, ProtocolVersion, RawContent, Tool};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Revision advertised by the tool servers and requested by the client.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::V_2024_11_05;

pub fn implementation(name: impl Into<String>, version: impl Into<String>) -> Implementation {
    Implementation { name: name.into(), version: version.into(), ..Implementation::from_build_env() }
}

/// A tool as the rest of the workspace sees it: name, description and the
/// JSON schema of its arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn to_tool(&self) -> Tool {
        let schema = match &self.input_schema {
            Value::Object(object) => object.clone(),
            _ => Map::new(),
        };
        Tool::new(self.name.clone(), self.description.clone(), Arc::new(schema))
    }
}

impl From<Tool> for ToolDefinition {
    fn from(tool: Tool) -> Self {
        Self {
            name: tool.name.to_string(),
            description: tool.description.map(|description| description.to_string()).unwrap_or_default(),
            input_schema: Value::Object(tool.input_schema.as_ref().clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Images, audio and embedded resources are not produced by these tools.
    #[serde(other)]
    Unsupported,
}

/// Outcome of a remote tool call, reduced to what the agents consume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// All text blocks joined by newlines.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Unsupported => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl From<rmcp::model::CallToolResult> for CallToolResult {
    fn from(result: rmcp::model::CallToolResult) -> Self {
        let content = result
            .content
            .into_iter()
            .map(|block| match block.raw {
                RawContent::Text(text) => ContentBlock::Text { text: text.text },
                _ => ContentBlock::Unsupported,
            })
            .collect();
        Self { content, is_error: result.is_error.unwrap_or(false) }
    }
}

/// A client frame that could not be decoded. `id` is the request id read
/// from the raw payload, or null when there is none to recover.
#[derive(Clone, Debug)]
pub struct RejectedFrame {
    pub id: Value,
    pub error: ErrorData,
}

impl RejectedFrame {
    /// The JSON-RPC error response for this frame.
    pub fn reply(&self) -> Value {
        json!({"jsonrpc": "2.0", "id": self.id, "error": self.error})
    }
}

impl fmt::Display for RejectedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.error.message)
    }
}

/// Decodes one inbound frame from a client.
pub fn decode_client_message(raw: &str) -> Result<ClientJsonRpcMessage, RejectedFrame> {
    let value: Value = serde_json::from_str(raw).map_err(|error| RejectedFrame {
        id: Value::Null,
        error: ErrorData::parse_error(format!("Parse error: {error}"), None),
    })?;
    let id = recover_id(&value);

    serde_json::from_value(value).map_err(|error| RejectedFrame {
        id,
        error: ErrorData::invalid_request(format!("Invalid request: {error}"), None),
    })
}

fn recover_id(value: &Value) -> Value {
    match value.get("id") {
        Some(id @ Value::String(_)) => id.clone(),
        Some(id @ Value::Number(number)) if number.is_i64() || number.is_u64() => id.clone(),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use rmcp::model::{ClientJsonRpcMessage, Content, ErrorCode, Tool};
    use serde_json::{json, Value};

    use super::{decode_client_message, CallToolResult, ContentBlock, ToolDefinition};

    #[test]
    fn decodes_client_requests() {
        let message = decode_client_message(r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#)
            .expect("ping decodes");
        assert!(matches!(message, ClientJsonRpcMessage::Request(_)));
    }

    #[test]
    fn unparseable_frame_is_a_parse_error_without_id() {
        let rejected = decode_client_message("{").expect_err("truncated");
        let reply = rejected.reply();

        assert_eq!(reply["id"], Value::Null);
        assert_eq!(reply["error"]["code"], ErrorCode::PARSE_ERROR.0);
        assert!(reply.get("result").is_none());
    }

    #[test]
    fn invalid_request_keeps_the_id_it_carried() {
        let rejected = decode_client_message(r#"{"jsonrpc":"2.0","id":42,"method":"tools/call","params":"oops"}"#)
            .expect_err("params must be an object");
        assert_eq!(rejected.id, json!(42));
        assert_eq!(rejected.error.code, ErrorCode::INVALID_REQUEST);

        let rejected = decode_client_message(r#"{"jsonrpc":"2.0","id":"req-9","method":"tools/call","params":{"arguments":{}}}"#)
            .expect_err("tool name is required");
        assert_eq!(rejected.reply()["id"], "req-9");

        let rejected = decode_client_message(r#"{"id":7,"method":"ping"}"#).expect_err("no jsonrpc member");
        assert_eq!(rejected.reply()["id"], json!(7));
    }

    #[test]
    fn non_scalar_ids_are_not_echoed() {
        let rejected = decode_client_message(r#"{"jsonrpc":"2.0","id":{"n":1},"method":"ping"}"#)
            .expect_err("object id");
        assert_eq!(rejected.id, Value::Null);
    }

    #[test]
    fn definitions_survive_the_tool_model() {
        let definition = ToolDefinition {
            name: "get_stock_price".to_string(),
            description: "Latest quote".to_string(),
            input_schema: json!({"type": "object", "required": ["symbol"]}),
        };

        let tool: Tool = definition.to_tool();
        assert_eq!(tool.name, "get_stock_price");
        assert_eq!(ToolDefinition::from(tool), definition);
    }

    #[test]
    fn non_text_content_is_skipped_when_joining() {
        let result = CallToolResult::from(rmcp::model::CallToolResult::success(vec![
            Content::text("first"),
            Content::image("AAAA", "image/png"),
            Content::text("second"),
        ]));

        assert_eq!(result.content[1], ContentBlock::Unsupported);
        assert_eq!(result.joined_text(), "first\nsecond");
        assert!(!result.is_error);
    }
}
