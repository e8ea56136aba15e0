//! MCP over HTTP server-sent events.
//!
//! The client opens `GET /sse`; the first event (`endpoint`) names the URL it
//! must POST its JSON-RPC messages to. Replies travel back on the stream as
//! `message` events. rmcp 0.8 only ships the client half of this transport,
//! so the server half is an axum router feeding an rmcp session per stream.

use std::collections::HashMap;
use std::convert::Infallible;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::{future, stream, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::model::ClientJsonRpcMessage;
use rmcp::transport::sse_client::{SseClientConfig, SseClientTransport};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{spawn_session, SessionChannels, TransportError};
use crate::protocol::decode_client_message;
use crate::server::ToolServer;

pub const SSE_PATH: &str = "/sse";
pub const MESSAGES_PATH: &str = "/messages/";

type Sessions = Arc<Mutex<HashMap<String, mpsc::Sender<ClientJsonRpcMessage>>>>;

#[derive(Clone)]
pub struct SseState {
    server: ToolServer,
    sessions: Sessions,
}

impl SseState {
    pub fn new(server: ToolServer) -> Self {
        Self { server, sessions: Arc::default() }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn sender(&self, session_id: &str) -> Option<mpsc::Sender<ClientJsonRpcMessage>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).get(session_id).cloned()
    }
}

/// Removes the session when its event stream is dropped.
struct SessionGuard {
    id: String,
    sessions: Sessions,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.id);
        info!(event_name = "mcp.sse.session_closed", session_id = %self.id, "sse session closed");
    }
}

pub fn router(server: ToolServer) -> Router {
    router_with_state(SseState::new(server))
}

pub fn router_with_state(state: SseState) -> Router {
    Router::new()
        .route(SSE_PATH, get(open_stream))
        .route(MESSAGES_PATH, post(post_message))
        .route("/messages", post(post_message))
        .route("/health", get(health))
        .with_state(state)
}

/// Resolves `host` (an IP literal or a hostname) and binds `port` on it.
pub async fn bind(host: &str, port: u16) -> io::Result<TcpListener> {
    TcpListener::bind((host, port)).await
}

/// Binds `host:port` and serves until ctrl-c.
pub async fn serve_sse(server: ToolServer, host: &str, port: u16) -> io::Result<()> {
    let listener = bind(host, port).await?;
    let bound = listener.local_addr()?;

    info!(
        event_name = "mcp.sse.start",
        server = %server.info().name,
        host,
        bind_address = %bound,
        "sse tool server listening on http://{bound}{SSE_PATH}"
    );

    axum::serve(listener, router(server)).with_graceful_shutdown(shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(event_name = "mcp.sse.signal_failed", error = %error, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!(event_name = "mcp.sse.shutdown", "shutting down sse tool server");
}

pub async fn open_stream(State(state): State<SseState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = Uuid::new_v4().simple().to_string();
    let SessionChannels { inbound, outbound } = spawn_session(state.server.clone(), session_id.clone());
    state.sessions.lock().unwrap_or_else(PoisonError::into_inner).insert(session_id.clone(), inbound);

    info!(event_name = "mcp.sse.session_opened", session_id = %session_id, "sse session opened");

    let endpoint = Event::default().event("endpoint").data(format!("{MESSAGES_PATH}?session_id={session_id}"));
    let guard = SessionGuard { id: session_id, sessions: Arc::clone(&state.sessions) };

    let messages = outbound.filter_map(move |message| {
        let _session = &guard;
        let event = match serde_json::to_string(&message) {
            Ok(json) => Some(Ok::<Event, Infallible>(Event::default().event("message").data(json))),
            Err(error) => {
                warn!(event_name = "mcp.sse.encode_failed", error = %error, "dropping unencodable reply");
                None
            }
        };
        future::ready(event)
    });

    Sse::new(stream::once(future::ready(Ok::<Event, Infallible>(endpoint))).chain(messages))
        .keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: String,
}

pub async fn post_message(
    State(state): State<SseState>,
    Query(query): Query<SessionQuery>,
    body: String,
) -> Response {
    let Some(sender) = state.sender(&query.session_id) else {
        debug!(event_name = "mcp.sse.unknown_session", session_id = %query.session_id, "unknown session");
        return (StatusCode::NOT_FOUND, "Could not find session").into_response();
    };

    let message = match decode_client_message(&body) {
        Ok(message) => message,
        Err(rejected) => {
            warn!(
                event_name = "mcp.sse.bad_message",
                session_id = %query.session_id,
                id = %rejected.id,
                error = %rejected,
                "rejecting malformed message"
            );
            return (StatusCode::BAD_REQUEST, format!("Could not parse message: {rejected}")).into_response();
        }
    };

    if sender.send(message).await.is_err() {
        debug!(event_name = "mcp.sse.session_gone", session_id = %query.session_id, "session already ended");
        return (StatusCode::NOT_FOUND, "Could not find session").into_response();
    }

    (StatusCode::ACCEPTED, "Accepted").into_response()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub server: String,
    pub version: String,
    pub tools: usize,
    pub sessions: usize,
    pub checked_at: String,
}

pub async fn health(State(state): State<SseState>) -> (StatusCode, Json<HealthResponse>) {
    let payload = HealthResponse {
        status: "ready",
        server: state.server.info().name.clone(),
        version: state.server.info().version.clone(),
        tools: state.server.definitions().len(),
        sessions: state.session_count(),
        checked_at: Utc::now().to_rfc3339(),
    };
    (StatusCode::OK, Json(payload))
}

/// Opens the event stream at `url` and waits for its endpoint event, using
/// rmcp's SSE client over a reqwest client that carries `headers`.
pub async fn connect(
    url: &str,
    headers: &HashMap<String, String>,
    connect_timeout: Duration,
) -> Result<SseClientTransport<reqwest::Client>, TransportError> {
    let http = reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .default_headers(header_map(headers)?)
        .build()
        .map_err(|error| TransportError::Connect(error.to_string()))?;
    let config = SseClientConfig { sse_endpoint: url.into(), ..SseClientConfig::default() };

    let transport = tokio::time::timeout(connect_timeout, SseClientTransport::start_with_client(http, config))
        .await
        .map_err(|_| TransportError::Connect(format!("{url}: no endpoint event within {connect_timeout:?}")))?
        .map_err(|error| TransportError::Connect(format!("{url}: {error}")))?;

    info!(event_name = "mcp.sse.connected", url = %url, "sse stream open");
    Ok(transport)
}

fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|error| TransportError::Connect(format!("invalid header `{name}`: {error}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|error| TransportError::Connect(format!("invalid value for `{name}`: {error}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use rmcp::model::ClientJsonRpcMessage;
    use tower::ServiceExt;

    use super::{bind, header_map, router_with_state, SseState};
    use crate::server::ToolServer;
    use crate::transport::TransportError;

    fn state() -> SseState {
        SseState::new(ToolServer::builder("empty", "0.1.0").build().expect("builds"))
    }

    #[tokio::test]
    async fn binds_hostnames_as_well_as_addresses() {
        let listener = bind("localhost", 0).await.expect("localhost resolves");
        assert!(listener.local_addr().expect("address").ip().is_loopback());

        let listener = bind("127.0.0.1", 0).await.expect("literal address");
        assert!(listener.local_addr().expect("address").port() > 0);
    }

    #[test]
    fn invalid_headers_are_connect_errors() {
        let headers = HashMap::from([("bad header".to_string(), "x".to_string())]);
        assert!(matches!(header_map(&headers), Err(TransportError::Connect(_))));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let response = router_with_state(state())
            .oneshot(
                Request::post("/messages/?session_id=deadbeef")
                    .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let state = state();
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        state.sessions.lock().expect("lock").insert("abc".to_string(), tx);

        let response = router_with_state(state)
            .oneshot(Request::post("/messages/?session_id=abc").body(Body::from("{not json")).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn accepted_message_is_forwarded_to_the_session() {
        let state = state();
        let (tx, mut rx) = tokio::sync::mpsc::channel(1);
        state.sessions.lock().expect("lock").insert("abc".to_string(), tx);

        let response = router_with_state(state)
            .oneshot(
                Request::post("/messages/?session_id=abc")
                    .body(Body::from(r#"{"jsonrpc":"2.0","id":5,"method":"ping"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let forwarded = rx.recv().await.expect("message forwarded");
        assert!(matches!(forwarded, ClientJsonRpcMessage::Request(_)));
    }

    #[tokio::test]
    async fn health_reports_tool_and_session_counts() {
        let state = state();
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        state.sessions.lock().expect("lock").insert("abc".to_string(), tx);

        let (status, axum::Json(payload)) = super::health(axum::extract::State(state)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.server, "empty");
        assert_eq!(payload.tools, 0);
        assert_eq!(payload.sessions, 1);
    }
}
