use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use concierge_core::{Classified, ErrorClass};
use rmcp::model::{CallToolRequestParam, ClientCapabilities, ClientInfo, Implementation};
use rmcp::service::{RunningService, ServiceError};
use rmcp::transport::IntoTransport;
use rmcp::{Peer, RoleClient, ServiceExt};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::protocol::{implementation, CallToolResult, ToolDefinition, PROTOCOL_VERSION};
use crate::transport::{sse, stdio, TransportError};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How to reach a tool server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerParams {
    Stdio { command: PathBuf, args: Vec<String>, env: HashMap<String, String> },
    Sse { url: String, headers: HashMap<String, String>, connect_timeout: Duration },
}

impl ServerParams {
    pub fn stdio(command: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::Stdio { command: command.into(), args: args.into_iter().map(Into::into).collect(), env: HashMap::new() }
    }

    pub fn sse(url: impl Into<String>) -> Self {
        Self::Sse { url: url.into(), headers: HashMap::new(), connect_timeout: DEFAULT_CONNECT_TIMEOUT }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Stdio { command, args, .. } => {
                let mut parts = vec![command.display().to_string()];
                parts.extend(args.iter().cloned());
                format!("stdio:{}", parts.join(" "))
            }
            Self::Sse { url, .. } => format!("sse:{url}"),
        }
    }

    async fn connect(&self, options: &ClientOptions) -> Result<McpSession, ClientError> {
        let label = self.describe();
        match self {
            Self::Stdio { command, args, env } => {
                McpSession::connect(stdio::launch(command, args, env)?, label, options).await
            }
            Self::Sse { url, headers, connect_timeout } => {
                let transport = sse::connect(url, headers, *connect_timeout).await?;
                McpSession::connect(transport, label, options).await
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub client_info: Implementation,
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            client_info: implementation("concierge", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("handshake with `{server}` failed: {reason}")]
    Handshake { server: String, reason: String },
    #[error("server error {code}: {message}")]
    Rpc { code: i32, message: String },
    #[error("`{method}` timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    #[error("connection closed before `{method}` completed")]
    ConnectionClosed { method: String },
    #[error("server `{server}` does not offer tools")]
    ToolsUnsupported { server: String },
}

impl ClientError {
    fn from_service(method: &str, error: ServiceError) -> Self {
        match error {
            ServiceError::McpError(error) => Self::Rpc { code: error.code.0, message: error.message.into_owned() },
            ServiceError::TransportClosed => Self::ConnectionClosed { method: method.to_string() },
            other => Self::Transport(TransportError::Failed(format!("`{method}`: {other}"))),
        }
    }
}

impl Classified for ClientError {
    fn error_class(&self) -> ErrorClass {
        ErrorClass::Connection
    }
}

/// An initialized rmcp client session with one tool server.
pub struct McpSession {
    label: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ClientInfo>>>,
    closed: AtomicBool,
    request_timeout: Duration,
}

impl McpSession {
    /// Runs the `initialize` handshake over `transport` and checks that the
    /// server offers tools.
    pub async fn connect<T, E, A>(transport: T, label: String, options: &ClientOptions) -> Result<Self, ClientError>
    where
        T: IntoTransport<RoleClient, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let client = ClientInfo {
            protocol_version: PROTOCOL_VERSION,
            capabilities: ClientCapabilities::default(),
            client_info: options.client_info.clone(),
        };
        let service = tokio::time::timeout(options.request_timeout, client.serve(transport))
            .await
            .map_err(|_| ClientError::Timeout { method: "initialize".to_string(), timeout: options.request_timeout })?
            .map_err(|error| ClientError::Handshake { server: label.clone(), reason: error.to_string() })?;

        let Some(server) = service.peer_info().cloned() else {
            return Err(ClientError::Handshake { server: label, reason: "no initialize result".to_string() });
        };
        if server.capabilities.tools.is_none() {
            let _ = service.cancel().await;
            return Err(ClientError::ToolsUnsupported { server: server.server_info.name });
        }

        info!(
            event_name = "mcp.client.initialized",
            server = %server.server_info.name,
            server_version = %server.server_info.version,
            protocol_version = %server.protocol_version,
            "tool server handshake complete"
        );

        Ok(Self {
            label,
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
            closed: AtomicBool::new(false),
            request_timeout: options.request_timeout,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn request<T, F>(&self, method: &str, call: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed { method: method.to_string() });
        }
        debug!(event_name = "mcp.client.request", server = %self.label, method, "sending request");

        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result.map_err(|error| ClientError::from_service(method, error)),
            Err(_) => Err(ClientError::Timeout { method: method.to_string(), timeout: self.request_timeout }),
        }
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ClientError> {
        let tools = self.request("tools/list", self.peer.list_all_tools()).await?;
        Ok(tools.into_iter().map(ToolDefinition::from).collect())
    }

    pub async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<CallToolResult, ClientError> {
        let params = CallToolRequestParam { name: name.to_string().into(), arguments: Some(arguments) };
        let result = self.request("tools/call", self.peer.call_tool(params)).await?;
        Ok(result.into())
    }

    /// Cancels the session. For stdio servers this also ends the child
    /// process. Calling it twice is harmless.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.closed.store(true, Ordering::SeqCst);
        let Some(service) = self.service.lock().await.take() else {
            return Ok(());
        };
        let reason = service
            .cancel()
            .await
            .map_err(|error| TransportError::Failed(format!("closing `{}`: {error}", self.label)))?;
        debug!(event_name = "mcp.client.cancelled", server = %self.label, reason = ?reason, "session cancelled");
        Ok(())
    }
}

/// A tool discovered on a remote server.
#[derive(Clone)]
pub struct RemoteTool {
    definition: ToolDefinition,
    session: Arc<McpSession>,
}

impl std::fmt::Debug for RemoteTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTool").field("definition", &self.definition).finish_non_exhaustive()
    }
}

impl RemoteTool {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn description(&self) -> &str {
        &self.definition.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.definition.input_schema
    }

    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    /// Invokes the tool. `arguments` must be a JSON object or null.
    pub async fn call(&self, arguments: Value) -> Result<CallToolResult, ClientError> {
        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ClientError::Rpc {
                    code: rmcp::model::ErrorCode::INVALID_PARAMS.0,
                    message: format!("tool arguments must be an object, got {other}"),
                })
            }
        };
        self.session.call_tool(&self.definition.name, arguments).await
    }
}

/// Teardown handle returned alongside discovered tools.
pub struct ToolsetHandle {
    session: Option<Arc<McpSession>>,
    label: String,
    closed: AtomicBool,
}

impl std::fmt::Debug for ToolsetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolsetHandle")
            .field("label", &self.label)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl ToolsetHandle {
    /// A handle with nothing behind it.
    pub fn inert(label: impl Into<String>) -> Self {
        Self { session: None, label: label.into(), closed: AtomicBool::new(true) }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some() && !self.closed.load(Ordering::SeqCst)
    }

    pub async fn close(&self) -> Result<(), ClientError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(session) = &self.session {
            session.close().await?;
            info!(event_name = "mcp.client.closed", server = %self.label, "tool server connection closed");
        }
        Ok(())
    }
}

impl Drop for ToolsetHandle {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(session) = self.session.take() else {
            return;
        };
        // without a runtime the rmcp service is cancelled when its last owner drops
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = session.close().await;
            });
        }
    }
}

/// Connects, performs the handshake and lists the server's tools.
pub async fn load_tools(
    params: &ServerParams,
    options: &ClientOptions,
) -> Result<(Vec<RemoteTool>, ToolsetHandle), ClientError> {
    let label = params.describe();
    info!(event_name = "mcp.client.connecting", server = %label, "connecting to tool server");

    let session = Arc::new(params.connect(options).await?);
    let definitions = match session.list_tools().await {
        Ok(definitions) => definitions,
        Err(error) => {
            let _ = session.close().await;
            return Err(error);
        }
    };

    info!(event_name = "mcp.client.tools_loaded", server = %label, tools = definitions.len(), "tools discovered");

    let tools = definitions
        .into_iter()
        .map(|definition| RemoteTool { definition, session: Arc::clone(&session) })
        .collect();
    let handle = ToolsetHandle { session: Some(session), label, closed: AtomicBool::new(false) };

    Ok((tools, handle))
}

/// Like [`load_tools`], but a failure yields no tools and an inert handle.
/// Used for optional servers whose absence should not abort the caller.
pub async fn load_tools_or_empty(
    params: &ServerParams,
    options: &ClientOptions,
    hint: &str,
) -> (Vec<RemoteTool>, ToolsetHandle) {
    match load_tools(params, options).await {
        Ok(loaded) => loaded,
        Err(error) => {
            error!(
                event_name = "mcp.client.optional_server_unavailable",
                server = %params.describe(),
                error = %error,
                "could not connect to tool server"
            );
            warn!(event_name = "mcp.client.hint", "{hint}");
            (Vec::new(), ToolsetHandle::inert(params.describe()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rmcp::model::{ErrorCode, ErrorData};
    use rmcp::service::ServiceError;

    use super::{ClientError, ClientOptions, McpSession, ServerParams};
    use crate::server::ToolServer;
    use crate::transport::stdio::serve_lines;

    #[test]
    fn service_errors_map_to_client_errors() {
        let rpc = ClientError::from_service(
            "tools/call",
            ServiceError::McpError(ErrorData::invalid_params("Unknown tool: nope", None)),
        );
        assert!(matches!(rpc, ClientError::Rpc { code, ref message } if code == ErrorCode::INVALID_PARAMS.0 && message.contains("nope")));

        let closed = ClientError::from_service("tools/list", ServiceError::TransportClosed);
        assert!(matches!(closed, ClientError::ConnectionClosed { ref method } if method == "tools/list"));
    }

    #[test]
    fn params_describe_their_target() {
        assert_eq!(ServerParams::sse("http://localhost:8181/sse").describe(), "sse:http://localhost:8181/sse");
        assert_eq!(
            ServerParams::stdio("concierge-server", ["stock", "--transport", "stdio"]).describe(),
            "stdio:concierge-server stock --transport stdio"
        );
    }

    #[tokio::test]
    async fn empty_server_lists_nothing_and_closes_once() {
        let server = ToolServer::builder("empty", "0.1.0").build().expect("builds");
        let (client_end, server_end) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_end);
        tokio::spawn(serve_lines(server, server_read, server_write));

        let options = ClientOptions { request_timeout: Duration::from_secs(5), ..ClientOptions::default() };
        let session = McpSession::connect(tokio::io::split(client_end), "duplex".to_string(), &options)
            .await
            .expect("handshake");

        assert!(session.list_tools().await.expect("list").is_empty());
        session.close().await.expect("close");
        session.close().await.expect("second close is harmless");
        assert!(matches!(
            session.list_tools().await,
            Err(ClientError::ConnectionClosed { .. })
        ));
    }
}
