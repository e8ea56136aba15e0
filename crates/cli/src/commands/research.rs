use std::sync::Arc;

use concierge_agent::{build_researcher, InMemorySessionService, Runner};
use concierge_mcp::load_tools;

use super::tools::ServerChoice;
use super::{
    agent_model, as_tools, client_options, close_all, converse, load_config, read_query, runtime,
    CliError, CommandResult,
};
use crate::GlobalOptions;

const COMMAND: &str = "research";

/// Launches the search tool server as a child process and runs the single
/// research agent against it.
pub fn run(global: &GlobalOptions, query: Option<String>) -> CommandResult {
    match research(global, query) {
        Ok(answer) => CommandResult::success_with_body(COMMAND, &answer, "answered by search_agent"),
        Err(error) => error.into_result(COMMAND),
    }
}

fn research(global: &GlobalOptions, query: Option<String>) -> Result<String, CliError> {
    let config = load_config(global)?;
    let model = agent_model(&config)?;
    let query = read_query(query)?;
    let params = ServerChoice::Search.params(&config, true)?;
    let options = client_options(&config);

    runtime()?.block_on(async {
        let (tools, handle) = load_tools(&params, &options).await?;

        let outcome = async {
            let agent = build_researcher(model, as_tools("search", tools))?;
            let runner =
                Runner::new(config.session.app_name.clone(), agent, Arc::new(InMemorySessionService::new()));
            converse(&runner, &config.session, &query).await
        }
        .await;

        close_all(std::slice::from_ref(&handle)).await;
        outcome.map(|turn| turn.answer)
    })
}
