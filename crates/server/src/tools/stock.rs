use async_trait::async_trait;
use concierge_mcp::{parse_arguments, ToolCallError, ToolDefinition, ToolHandler, ToolOutput};
use concierge_services::FinnhubClient;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{json_output, service_failure};

pub struct LookupSymbol {
    client: FinnhubClient,
}

impl LookupSymbol {
    pub fn new(client: FinnhubClient) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct LookupArgs {
    query: String,
}

#[async_trait]
impl ToolHandler for LookupSymbol {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "lookup_symbol".to_string(),
            description: "Get the symbol of a stock from a query; useful if symbol is not known. \
                          Returns matches with description, displaySymbol, symbol and type."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "name of company"}
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolCallError> {
        let args: LookupArgs = parse_arguments(arguments)?;
        let lookup = self
            .client
            .symbol_lookup(&args.query)
            .await
            .map_err(|error| service_failure("lookup_symbol", error))?;
        json_output(&lookup)
    }
}

pub struct GetStockPrice {
    client: FinnhubClient,
}

impl GetStockPrice {
    pub fn new(client: FinnhubClient) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct QuoteArgs {
    symbol: String,
}

#[async_trait]
impl ToolHandler for GetStockPrice {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_stock_price".to_string(),
            description: "Get live stock price via finnhub API. Returns current_price, change, \
                          percentage_change, day_high, day_low, day_open_price, previous_close_price \
                          and timestamp."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "symbol": {"type": "string", "description": "stock symbol, e.g. QQQM"}
                },
                "required": ["symbol"]
            }),
        }
    }

    async fn call(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolCallError> {
        let args: QuoteArgs = parse_arguments(arguments)?;
        let quote = self
            .client
            .quote(&args.symbol)
            .await
            .map_err(|error| service_failure("get_stock_price", error))?;
        json_output(&quote)
    }
}
