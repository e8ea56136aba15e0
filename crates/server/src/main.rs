mod bootstrap;
mod tools;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use concierge_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use concierge_core::logging;
use concierge_mcp::transport::{sse, stdio};

use crate::bootstrap::{build_server, ServerKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum TransportKind {
    Stdio,
    Sse,
}

/// Serves one group of concierge tools over MCP.
#[derive(Debug, Parser)]
#[command(name = "concierge-server", version, about)]
struct Args {
    #[arg(value_enum)]
    kind: ServerKind,
    #[arg(long, value_enum, default_value_t = TransportKind::Stdio)]
    transport: TransportKind,
    /// IP address or hostname to bind in sse mode.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Defaults to 8080 for search, 8181 for stock, 8182 for health-check.
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    run(Args::parse()).await
}

async fn run(args: Args) -> Result<()> {
    let config = AppConfig::load(LoadOptions {
        config_path: args.config.clone(),
        require_file: args.config.is_some(),
        load_dotenv: true,
        overrides: ConfigOverrides { log_level: args.log_level.clone(), ..ConfigOverrides::default() },
    })?;
    // stdout belongs to the protocol in stdio mode; logs always go to stderr
    logging::init(&config.logging);

    let server = build_server(args.kind, &config)?;

    match args.transport {
        TransportKind::Stdio => {
            tracing::info!(
                event_name = "server.stdio.start",
                server = args.kind.server_name(),
                "serving tools on stdio"
            );
            stdio::serve_stdio(server).await.context("stdio transport failed")?;
        }
        TransportKind::Sse => {
            let port = args.port.unwrap_or_else(|| args.kind.default_port());
            sse::serve_sse(server, &args.host, port)
                .await
                .with_context(|| format!("sse transport failed on {}:{port}", args.host))?;
        }
    }

    tracing::info!(event_name = "server.stopped", server = args.kind.server_name(), "tool server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Args, TransportKind};
    use crate::bootstrap::ServerKind;

    #[test]
    fn defaults_to_stdio_on_all_interfaces() {
        let args = Args::try_parse_from(["concierge-server", "stock"]).expect("parses");

        assert_eq!(args.kind, ServerKind::Stock);
        assert_eq!(args.transport, TransportKind::Stdio);
        assert_eq!(args.host, "0.0.0.0");
        assert_eq!(args.port, None);
    }

    #[test]
    fn sse_with_explicit_port() {
        let args = Args::try_parse_from([
            "concierge-server",
            "health-check",
            "--transport",
            "sse",
            "--host",
            "127.0.0.1",
            "--port",
            "9100",
        ])
        .expect("parses");

        assert_eq!(args.kind, ServerKind::HealthCheck);
        assert_eq!(args.transport, TransportKind::Sse);
        assert_eq!(args.port, Some(9100));
    }

    #[test]
    fn hostnames_are_accepted_for_the_bind_host() {
        let args = Args::try_parse_from(["concierge-server", "search", "--transport", "sse", "--host", "localhost"])
            .expect("parses");

        assert_eq!(args.host, "localhost");
        assert_eq!(args.kind.default_port(), 8080);
    }

    #[test]
    fn unknown_server_kind_is_rejected() {
        assert!(Args::try_parse_from(["concierge-server", "weather"]).is_err());
    }
}
