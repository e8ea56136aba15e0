use std::sync::Arc;

use concierge_agent::{build_assistant, InMemorySessionService, Runner, TeamTools};
use concierge_core::config::AppConfig;
use concierge_llm::LlmClient;
use concierge_mcp::{load_tools, load_tools_or_empty, ToolsetHandle};
use tracing::info;

use super::tools::ServerChoice;
use super::{
    agent_model, as_tools, client_options, close_all, converse, load_config, read_query, runtime,
    CliError, CommandResult,
};
use crate::GlobalOptions;

const COMMAND: &str = "ask";
const HEALTH_CHECK_HINT: &str =
    "continuing without mental health screening; start it with `concierge-server health-check --transport sse`";

/// Runs one query through the assistant team. Search and stock servers are
/// required; the health-check server is skipped when unreachable.
pub fn run(global: &GlobalOptions, query: Option<String>, health_check: bool) -> CommandResult {
    match answer(global, query, health_check) {
        Ok((answer, author)) => CommandResult::success_with_body(COMMAND, &answer, format!("answered by {author}")),
        Err(error) => error.into_result(COMMAND),
    }
}

fn answer(global: &GlobalOptions, query: Option<String>, health_check: bool) -> Result<(String, String), CliError> {
    let config = load_config(global)?;
    let model = agent_model(&config)?;
    let query = read_query(query)?;
    let options = client_options(&config);

    runtime()?.block_on(async {
        let mut handles: Vec<ToolsetHandle> = Vec::new();
        let mut tools = TeamTools::default();

        let connected = async {
            let (search, handle) = load_tools(&ServerChoice::Search.params(&config, false)?, &options).await?;
            handles.push(handle);
            tools.search = as_tools("search", search);

            let (stock, handle) = load_tools(&ServerChoice::Stock.params(&config, false)?, &options).await?;
            handles.push(handle);
            tools.stock = as_tools("stock", stock);

            if health_check {
                let params = ServerChoice::HealthCheck.params(&config, false)?;
                let (screening, handle) = load_tools_or_empty(&params, &options, HEALTH_CHECK_HINT).await;
                handles.push(handle);
                tools.screening = as_tools("health_check", screening);
            }
            Ok::<_, CliError>(())
        }
        .await;

        let outcome = match connected {
            Ok(()) => {
                info!(
                    event_name = "cli.ask.tools_ready",
                    search = tools.search.len(),
                    stock = tools.stock.len(),
                    screening = tools.screening.len(),
                    "tool servers connected"
                );
                run_team(&config, model, tools, &query).await
            }
            Err(error) => Err(error),
        };

        close_all(&handles).await;
        outcome
    })
}

async fn run_team(
    config: &AppConfig,
    model: Arc<dyn LlmClient>,
    tools: TeamTools,
    query: &str,
) -> Result<(String, String), CliError> {
    let assistant = build_assistant(model, tools)?;
    let runner = Runner::new(config.session.app_name.clone(), assistant, Arc::new(InMemorySessionService::new()));

    let outcome = converse(&runner, &config.session, query).await?;
    Ok((outcome.answer, outcome.author))
}
