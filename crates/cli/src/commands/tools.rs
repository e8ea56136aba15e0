use clap::ValueEnum;
use concierge_core::config::AppConfig;
use concierge_core::ErrorClass;
use concierge_mcp::{load_tools, ServerParams, ToolDefinition};

use super::{client_options, close_all, load_config, runtime, server_command, CliError, CommandResult};
use crate::GlobalOptions;

const COMMAND: &str = "tools";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ServerChoice {
    Stock,
    Search,
    HealthCheck,
}

impl ServerChoice {
    /// The `concierge-server` positional argument for this server.
    pub fn server_arg(self) -> &'static str {
        match self {
            Self::Stock => "stock",
            Self::Search => "search",
            Self::HealthCheck => "health-check",
        }
    }

    pub fn url(self, config: &AppConfig) -> &str {
        match self {
            Self::Stock => &config.tool_servers.stock_url,
            Self::Search => &config.tool_servers.search_url,
            Self::HealthCheck => &config.tool_servers.health_check_url,
        }
    }

    pub(crate) fn params(self, config: &AppConfig, stdio: bool) -> Result<ServerParams, CliError> {
        if stdio {
            let command = server_command(config)?;
            Ok(ServerParams::stdio(command, [self.server_arg(), "--transport", "stdio"]))
        } else {
            Ok(ServerParams::sse(self.url(config)))
        }
    }
}

pub fn run(global: &GlobalOptions, server: ServerChoice, stdio: bool) -> CommandResult {
    match list(global, server, stdio) {
        Ok((body, count)) => CommandResult::success_with_body(
            COMMAND,
            &body,
            format!("{count} tool(s) on the {} server", server.server_arg()),
        ),
        Err(error) => error.into_result(COMMAND),
    }
}

fn list(global: &GlobalOptions, server: ServerChoice, stdio: bool) -> Result<(String, usize), CliError> {
    let config = load_config(global)?;
    let params = server.params(&config, stdio)?;
    let options = client_options(&config);

    let definitions: Vec<ToolDefinition> = runtime()?.block_on(async {
        let (tools, handle) = load_tools(&params, &options).await?;
        let definitions = tools.iter().map(|tool| tool.definition().clone()).collect();
        close_all(std::slice::from_ref(&handle)).await;
        Ok::<_, CliError>(definitions)
    })?;

    let body = serde_json::to_string_pretty(&definitions).map_err(|error| {
        CliError::new(ErrorClass::Internal, format!("could not render tool definitions: {error}"))
    })?;
    Ok((body, definitions.len()))
}

#[cfg(test)]
mod tests {
    use concierge_core::config::AppConfig;
    use concierge_mcp::ServerParams;

    use super::ServerChoice;

    #[test]
    fn sse_params_use_the_configured_urls() {
        let mut config = AppConfig::default();
        config.tool_servers.stock_url = "http://stocks.internal:8181/sse".to_string();

        let params = ServerChoice::Stock.params(&config, false).expect("params");
        assert_eq!(params, ServerParams::sse("http://stocks.internal:8181/sse"));
    }

    #[test]
    fn stdio_params_launch_the_server_binary() {
        let mut config = AppConfig::default();
        config.tool_servers.server_command = Some("/opt/concierge/bin/concierge-server".into());

        let params = ServerChoice::HealthCheck.params(&config, true).expect("params");
        assert_eq!(
            params.describe(),
            "stdio:/opt/concierge/bin/concierge-server health-check --transport stdio"
        );
    }
}
