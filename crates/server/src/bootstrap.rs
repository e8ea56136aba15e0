use std::sync::Arc;

use clap::ValueEnum;
use concierge_core::config::{AppConfig, ConfigError};
use concierge_core::{Classified, ErrorClass};
use concierge_llm::{GeminiClient, LlmClient, LlmError, RetryPolicy, RetryingLlm};
use concierge_mcp::{ServerBuildError, ToolServer};
use concierge_services::{FinnhubClient, MentalHealthScreener, SerperClient, ServiceError};
use thiserror::Error;
use tracing::info;

use crate::tools::health_check::PerformMentalHealthCheck;
use crate::tools::search::{GetPageText, SearchGoogle};
use crate::tools::stock::{GetStockPrice, LookupSymbol};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ServerKind {
    Stock,
    Search,
    HealthCheck,
}

impl ServerKind {
    /// Name reported in the initialize handshake.
    pub fn server_name(self) -> &'static str {
        match self {
            Self::Stock => "stock search",
            Self::Search => "google search",
            Self::HealthCheck => "health_check_service",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Self::Search => 8080,
            Self::Stock => 8181,
            Self::HealthCheck => 8182,
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("tool server definition is invalid: {0}")]
    Build(#[from] ServerBuildError),
}

impl Classified for BootstrapError {
    fn error_class(&self) -> ErrorClass {
        match self {
            Self::Config(error) => error.error_class(),
            Self::Service(error) => error.error_class(),
            Self::Llm(error) => error.error_class(),
            Self::Build(_) => ErrorClass::Internal,
        }
    }
}

/// Builds the tool server for `kind`. Credentials the server needs are
/// checked here so a misconfigured server never starts listening.
pub fn build_server(kind: ServerKind, config: &AppConfig) -> Result<ToolServer, BootstrapError> {
    let builder = ToolServer::builder(kind.server_name(), env!("CARGO_PKG_VERSION"));

    let server = match kind {
        ServerKind::Stock => {
            let client = FinnhubClient::new(
                config.require_finnhub_api_key()?.clone(),
                config.finnhub.base_url.clone(),
            )?;
            builder
                .instructions("Look up stock symbols and live quotes from Finnhub.")
                .tool(LookupSymbol::new(client.clone()))
                .tool(GetStockPrice::new(client))
                .build()?
        }
        ServerKind::Search => {
            let client = SerperClient::new(
                config.require_serper_api_key()?.clone(),
                config.serper.search_url.clone(),
                config.serper.scrape_url.clone(),
            )?;
            builder
                .instructions("Search Google and read web pages through Serper.")
                .tool(SearchGoogle::new(client.clone()))
                .tool(GetPageText::new(client))
                .build()?
        }
        ServerKind::HealthCheck => {
            config.require_llm_api_key()?;
            let gemini = GeminiClient::from_config(&config.llm)?.with_model(config.screening.model.clone());
            let model: Arc<dyn LlmClient> =
                Arc::new(RetryingLlm::new(gemini, RetryPolicy::from_config(&config.llm)));
            builder
                .instructions("Screen user queries for signs of mental health distress.")
                .tool(PerformMentalHealthCheck::new(MentalHealthScreener::new(model)))
                .build()?
        }
    };

    info!(
        event_name = "server.bootstrap.ready",
        server = kind.server_name(),
        tools = server.definitions().len(),
        "tool server assembled"
    );
    Ok(server)
}

#[cfg(test)]
mod tests {
    use concierge_core::config::{AppConfig, ConfigError};
    use concierge_core::{Classified, ErrorClass};

    use super::{build_server, BootstrapError, ServerKind};

    fn names(kind: ServerKind, config: &AppConfig) -> Vec<String> {
        build_server(kind, config)
            .expect("server builds")
            .definitions()
            .iter()
            .map(|definition| definition.name.clone())
            .collect()
    }

    #[test]
    fn each_server_exposes_its_tools() {
        let mut config = AppConfig::default();
        config.finnhub.api_key = Some("fh".to_string().into());
        config.serper.api_key = Some("sp".to_string().into());
        config.llm.api_key = Some("gm".to_string().into());

        assert_eq!(names(ServerKind::Stock, &config), ["lookup_symbol", "get_stock_price"]);
        assert_eq!(names(ServerKind::Search, &config), ["search_google", "get_page_text"]);
        assert_eq!(names(ServerKind::HealthCheck, &config), ["perform_mental_health_check"]);
    }

    #[test]
    fn missing_credentials_fail_fast() {
        let config = AppConfig::default();

        for (kind, key) in [
            (ServerKind::Stock, "finnhub.api_key"),
            (ServerKind::Search, "serper.api_key"),
            (ServerKind::HealthCheck, "llm.api_key"),
        ] {
            let error = build_server(kind, &config).err().expect("missing credential");
            assert!(
                matches!(&error, BootstrapError::Config(ConfigError::MissingCredential { key: missing, .. }) if *missing == key),
                "{kind:?}: unexpected {error}"
            );
            assert_eq!(error.error_class(), ErrorClass::Configuration);
        }
    }

    #[test]
    fn handshake_names_and_ports_follow_the_server_kind() {
        assert_eq!(ServerKind::Stock.server_name(), "stock search");
        assert_eq!(ServerKind::Search.default_port(), 8080);
        assert_eq!(ServerKind::Stock.default_port(), 8181);
        assert_eq!(ServerKind::HealthCheck.default_port(), 8182);
    }
}
