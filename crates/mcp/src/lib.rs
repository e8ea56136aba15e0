//! Model Context Protocol plumbing on top of rmcp.
//!
//! - `protocol`: the tool and result types the workspace exchanges, and
//!   frame decoding with request-id recovery
//! - `server`: the tool server core (`ToolHandler`, `ToolServer`), an rmcp
//!   `ServerHandler`
//! - `transport`: newline-delimited stdio and HTTP server-sent events
//! - `client`: rmcp client sessions, tool discovery and teardown

pub mod client;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::{
    load_tools, load_tools_or_empty, ClientError, ClientOptions, McpSession, RemoteTool,
    ServerParams, ToolsetHandle,
};
pub use protocol::{
    decode_client_message, implementation, CallToolResult, ContentBlock, RejectedFrame,
    ToolDefinition, PROTOCOL_VERSION,
};
pub use server::{
    parse_arguments, ServerBuildError, ToolCallError, ToolHandler, ToolOutput, ToolServer,
    ToolServerBuilder,
};
pub use transport::TransportError;
