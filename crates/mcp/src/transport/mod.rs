use concierge_core::{Classified, ErrorClass};
use futures::channel::mpsc as frames;
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use rmcp::ServiceExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::server::ToolServer;

pub mod sse;
pub mod stdio;

/// Messages buffered per session direction before senders wait.
pub(crate) const SESSION_CAPACITY: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport failed: {0}")]
    Failed(String),
}

impl Classified for TransportError {
    fn error_class(&self) -> ErrorClass {
        ErrorClass::Connection
    }
}

/// The transport-facing ends of one server session: decoded client frames go
/// into `inbound`, replies come out of `outbound`. `outbound` ends once the
/// session has shut down.
pub(crate) struct SessionChannels {
    pub inbound: mpsc::Sender<ClientJsonRpcMessage>,
    pub outbound: frames::Receiver<ServerJsonRpcMessage>,
}

/// Runs `server` as an rmcp service over a channel pair. The session ends
/// when the inbound sender is dropped or the outbound receiver goes away.
pub(crate) fn spawn_session(server: ToolServer, session: String) -> SessionChannels {
    let (inbound, inbound_rx) = mpsc::channel(SESSION_CAPACITY);
    let (outbound_tx, outbound) = frames::channel(SESSION_CAPACITY);

    tokio::spawn(async move {
        match server.serve((outbound_tx, ReceiverStream::new(inbound_rx))).await {
            Ok(running) => match running.waiting().await {
                Ok(reason) => {
                    debug!(event_name = "mcp.session.ended", session = %session, reason = ?reason, "session ended")
                }
                Err(error) => {
                    warn!(event_name = "mcp.session.aborted", session = %session, error = %error, "session task failed")
                }
            },
            Err(error) => warn!(
                event_name = "mcp.session.handshake_failed",
                session = %session,
                error = %error,
                "client never completed the handshake"
            ),
        }
    });

    SessionChannels { inbound, outbound }
}
