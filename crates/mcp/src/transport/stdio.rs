//! Newline-delimited JSON-RPC over a byte stream pair.
//!
//! The server side frames stdin/stdout itself so that undecodable frames get
//! an error reply carrying the request id; the rmcp service only sees valid
//! messages. The client side launches tool servers through rmcp's child
//! process transport.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use futures::{future, stream, StreamExt};
use rmcp::transport::TokioChildProcess;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use super::{spawn_session, SessionChannels, TransportError, SESSION_CAPACITY};
use crate::protocol::decode_client_message;
use crate::server::ToolServer;

/// Serves `server` on the process's stdin/stdout until stdin closes.
pub async fn serve_stdio(server: ToolServer) -> io::Result<()> {
    serve_lines(server, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serves `server` over any line-oriented reader/writer pair. Returns after
/// EOF once the session has shut down and every queued frame is written.
pub async fn serve_lines<R, W>(server: ToolServer, reader: R, writer: W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    info!(event_name = "mcp.stdio.serving", server = %server.info().name, "serving over stdio");

    let SessionChannels { inbound, outbound } = spawn_session(server, "stdio".to_string());
    let (rejected_tx, rejected_rx) = mpsc::channel::<String>(SESSION_CAPACITY);

    let replies = outbound.filter_map(|message| {
        future::ready(match serde_json::to_string(&message) {
            Ok(frame) => Some(frame),
            Err(error) => {
                warn!(event_name = "mcp.stdio.encode_failed", error = %error, "dropping unencodable reply");
                None
            }
        })
    });
    let mut frames = stream::select(replies, ReceiverStream::new(rejected_rx));
    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(frame) = frames.next().await {
            write_line(&mut writer, &frame).await?;
        }
        Ok::<(), io::Error>(())
    });

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match decode_client_message(line) {
            Ok(message) => {
                if inbound.send(message).await.is_err() {
                    break;
                }
            }
            Err(rejected) => {
                warn!(
                    event_name = "mcp.stdio.bad_frame",
                    id = %rejected.id,
                    error = %rejected,
                    "rejecting malformed frame"
                );
                if rejected_tx.send(rejected.reply().to_string()).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(inbound);
    drop(rejected_tx);

    info!(event_name = "mcp.stdio.closed", "stdin closed");
    writer_task.await.map_err(io::Error::other)?
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, frame: &str) -> io::Result<()> {
    writer.write_all(frame.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Launches `command` with piped stdin/stdout as an rmcp client transport.
/// Its stderr is inherited; the process is killed when the transport drops.
pub fn launch(
    command: &Path,
    args: &[String],
    env: &HashMap<String, String>,
) -> Result<TokioChildProcess, TransportError> {
    let mut process = Command::new(command);
    process.args(args).envs(env);

    let transport = TokioChildProcess::new(process).map_err(|error| {
        TransportError::Connect(format!("failed to spawn `{}`: {error}", command.display()))
    })?;

    info!(event_name = "mcp.stdio.spawned", command = %command.display(), "tool server process started");
    Ok(transport)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use super::{launch, serve_lines};
    use crate::server::ToolServer;
    use crate::transport::TransportError;

    async fn reply_to(frame: &str) -> Value {
        let server = ToolServer::builder("empty", "0.1.0").build().expect("builds");
        let (client_end, server_end) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_end);
        tokio::spawn(serve_lines(server, server_read, server_write));

        let (client_read, mut client_write) = tokio::io::split(client_end);
        client_write.write_all(frame.as_bytes()).await.expect("write");

        let mut lines = BufReader::new(client_read).lines();
        let line = tokio::time::timeout(Duration::from_secs(1), lines.next_line())
            .await
            .expect("reply arrives")
            .expect("read")
            .expect("one line");
        serde_json::from_str(&line).expect("reply is json")
    }

    #[tokio::test]
    async fn malformed_request_is_answered_with_its_own_id() {
        let reply = reply_to("{\"jsonrpc\":\"2.0\",\"id\":17,\"method\":\"tools/call\",\"params\":7}\n").await;

        assert_eq!(reply["id"], json!(17));
        assert_eq!(reply["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn unparseable_line_is_answered_with_a_null_id() {
        let reply = reply_to("Starting server on stdio...\n").await;

        assert_eq!(reply["id"], Value::Null);
        assert_eq!(reply["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn launching_a_missing_binary_is_a_connect_error() {
        let Err(error) = launch(Path::new("/nonexistent/concierge-server"), &[], &HashMap::new()) else {
            panic!("spawning a missing binary should fail");
        };
        assert!(matches!(error, TransportError::Connect(ref detail) if detail.contains("/nonexistent/concierge-server")));
    }
}
