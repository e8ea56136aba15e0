use async_trait::async_trait;
use concierge_mcp::{parse_arguments, ToolCallError, ToolDefinition, ToolHandler, ToolOutput};
use concierge_services::SerperClient;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::service_failure;

const DEFAULT_RESULTS: u32 = 5;
const DEFAULT_PAGE: u32 = 1;

pub struct SearchGoogle {
    client: SerperClient,
}

impl SearchGoogle {
    pub fn new(client: SerperClient) -> Self {
        Self { client }
    }
}

fn default_results() -> u32 {
    DEFAULT_RESULTS
}

fn default_page() -> u32 {
    DEFAULT_PAGE
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default = "default_results")]
    n_results: u32,
    #[serde(default = "default_page")]
    page: u32,
}

#[async_trait]
impl ToolHandler for SearchGoogle {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_google".to_string(),
            description: "Google Search via Serper API. Returns results with title, link, snippet, \
                          date and other metadata."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "search query"},
                    "n_results": {
                        "type": "integer",
                        "description": "number of results to return per page",
                        "default": DEFAULT_RESULTS
                    },
                    "page": {"type": "integer", "description": "page number to return", "default": DEFAULT_PAGE}
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolCallError> {
        let args: SearchArgs = parse_arguments(arguments)?;
        let results = self
            .client
            .search(&args.query, args.n_results, args.page)
            .await
            .map_err(|error| service_failure("search_google", error))?;
        Ok(ToolOutput::Json(Value::Array(results)))
    }
}

pub struct GetPageText {
    client: SerperClient,
}

impl GetPageText {
    pub fn new(client: SerperClient) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct ScrapeArgs {
    url_to_scrape: String,
}

#[async_trait]
impl ToolHandler for GetPageText {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_page_text".to_string(),
            description: "Scrape text from a web page via Serper API. Returns the text content of the page."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url_to_scrape": {"type": "string", "description": "page url to scrape"}
                },
                "required": ["url_to_scrape"]
            }),
        }
    }

    async fn call(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolCallError> {
        let args: ScrapeArgs = parse_arguments(arguments)?;
        let text = self
            .client
            .scrape(&args.url_to_scrape)
            .await
            .map_err(|error| service_failure("get_page_text", error))?;
        Ok(ToolOutput::Text(text))
    }
}
