pub mod ask;
pub mod config;
pub mod research;
pub mod tools;

use std::fmt::Display;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use concierge_agent::{McpTool, Runner, Tool};
use concierge_core::config::{AppConfig, ConfigOverrides, LoadOptions, SessionConfig};
use concierge_core::{Classified, ErrorClass};
use concierge_llm::{Content, GeminiClient, LlmClient, RetryPolicy, RetryingLlm};
use concierge_mcp::{ClientOptions, RemoteTool, ToolsetHandle};
use serde::Serialize;
use serde_json::Map;
use tracing::{debug, warn};

use crate::GlobalOptions;

const SERVER_BINARY: &str = "concierge-server";

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    /// Success with a human-readable body printed above the outcome line.
    pub fn success_with_body(command: &str, body: &str, message: impl Into<String>) -> Self {
        let outcome = Self::success(command, message);
        Self { exit_code: 0, output: format!("{body}\n{}", outcome.output) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// A command failure carrying the class that picks the exit code.
#[derive(Debug)]
pub struct CliError {
    pub class: ErrorClass,
    pub message: String,
}

impl CliError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self { class, message: message.into() }
    }

    pub fn into_result(self, command: &str) -> CommandResult {
        CommandResult::failure(command, self.class.as_str(), self.message, self.class.exit_code())
    }
}

impl<E: Classified + Display> From<E> for CliError {
    fn from(error: E) -> Self {
        Self { class: error.error_class(), message: error.to_string() }
    }
}

pub(crate) fn load_config(global: &GlobalOptions) -> Result<AppConfig, CliError> {
    let config = AppConfig::load(LoadOptions {
        config_path: global.config.clone(),
        require_file: global.config.is_some(),
        load_dotenv: true,
        overrides: ConfigOverrides { log_level: global.log_level.clone(), ..ConfigOverrides::default() },
    })?;
    concierge_core::logging::init(&config.logging);
    Ok(config)
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Builder::new_multi_thread().enable_all().build().map_err(|error| {
        CliError::new(ErrorClass::Internal, format!("failed to initialize async runtime: {error}"))
    })
}

/// Uses `provided`, or prompts on stdin when it is absent.
pub(crate) fn read_query(provided: Option<String>) -> Result<String, CliError> {
    let query = match provided {
        Some(query) => query,
        None => {
            println!("Enter your query:");
            io::stdout().flush().ok();
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line).map_err(|error| {
                CliError::new(ErrorClass::Internal, format!("could not read query from stdin: {error}"))
            })?;
            line
        }
    };

    let query = query.trim().to_string();
    if query.is_empty() {
        return Err(CliError::new(ErrorClass::Internal, "query must not be empty"));
    }
    Ok(query)
}

/// The agent model, with rate-limit retries from `llm.max_attempts` and
/// `llm.retry_delay_secs`.
pub(crate) fn agent_model(config: &AppConfig) -> Result<Arc<dyn LlmClient>, CliError> {
    config.require_llm_api_key()?;
    let gemini = GeminiClient::from_config(&config.llm)?;
    Ok(Arc::new(RetryingLlm::new(gemini, RetryPolicy::from_config(&config.llm))))
}

pub(crate) fn client_options(config: &AppConfig) -> ClientOptions {
    ClientOptions { request_timeout: config.tool_servers.request_timeout(), ..ClientOptions::default() }
}

pub(crate) fn as_tools(server: &str, remote: Vec<RemoteTool>) -> Vec<Arc<dyn Tool>> {
    remote
        .into_iter()
        .map(|tool| Arc::new(McpTool::new(server, tool)) as Arc<dyn Tool>)
        .collect()
}

/// `tool_servers.server_command`, then `concierge-server` on PATH, then a
/// sibling of the running executable.
pub(crate) fn server_command(config: &AppConfig) -> Result<PathBuf, CliError> {
    if let Some(command) = &config.tool_servers.server_command {
        return Ok(command.clone());
    }
    if let Ok(found) = which::which(SERVER_BINARY) {
        return Ok(found);
    }

    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(SERVER_BINARY)))
        .filter(|candidate| candidate.exists())
        .ok_or_else(|| {
            CliError::new(
                ErrorClass::Configuration,
                format!("could not locate `{SERVER_BINARY}`; set CONCIERGE_SERVER_COMMAND or tool_servers.server_command"),
            )
        })
}

pub(crate) async fn close_all(handles: &[ToolsetHandle]) {
    for handle in handles {
        if let Err(error) = handle.close().await {
            warn!(
                event_name = "cli.toolset.close_failed",
                server = %handle.label(),
                error = %error,
                "could not close tool server connection"
            );
        }
    }
}

pub(crate) struct TurnOutcome {
    pub author: String,
    pub answer: String,
}

/// Creates the configured session and runs one turn, returning the final answer.
pub(crate) async fn converse(
    runner: &Runner,
    session: &SessionConfig,
    query: &str,
) -> Result<TurnOutcome, CliError> {
    runner
        .sessions()
        .create_session(runner.app_name(), &session.user_id, Some(&session.session_id), Map::new())
        .await?;

    let mut events = runner.run(&session.user_id, &session.session_id, Content::user_text(query)).await?;
    while let Some(event) = events.recv().await {
        if !event.is_final_response() {
            debug!(
                event_name = "cli.agent.event",
                author = %event.author,
                event = %serde_json::to_string(&event).unwrap_or_default(),
                "agent event"
            );
            continue;
        }

        if event.actions.escalate {
            let reason = event.error.as_deref().unwrap_or("No specific message.");
            return Err(CliError::new(ErrorClass::Agent, format!("agent error: {reason}")));
        }
        return Ok(TurnOutcome { author: event.author.clone(), answer: event.text().unwrap_or_default() });
    }

    Err(CliError::new(ErrorClass::Agent, "agent finished without a final response"))
}
