use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{check_status, http_client, ServiceError};

const SERVICE: &str = "finnhub";

/// Finnhub REST client for symbol search and live quotes.
#[derive(Clone)]
pub struct FinnhubClient {
    http: Client,
    api_key: SecretString,
    base_url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymbolMatch {
    #[serde(default)]
    pub description: String,
    #[serde(rename = "displaySymbol", default)]
    pub display_symbol: String,
    pub symbol: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymbolLookup {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub result: Vec<SymbolMatch>,
}

/// Quote with Finnhub's single-letter fields spelled out.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StockQuote {
    pub current_price: f64,
    pub change: Option<f64>,
    pub percentage_change: Option<f64>,
    pub day_high: f64,
    pub day_low: f64,
    pub day_open_price: f64,
    pub previous_close_price: f64,
    pub timestamp: String,
    pub timestamp_utc: String,
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    c: f64,
    d: Option<f64>,
    dp: Option<f64>,
    h: f64,
    l: f64,
    o: f64,
    pc: f64,
    #[serde(default)]
    t: i64,
}

impl RawQuote {
    fn into_quote(self) -> Result<StockQuote, ServiceError> {
        let at: DateTime<Utc> = DateTime::from_timestamp(self.t, 0).ok_or_else(|| {
            ServiceError::Decode { service: SERVICE, message: format!("invalid timestamp {}", self.t) }
        })?;

        Ok(StockQuote {
            current_price: self.c,
            change: self.d,
            percentage_change: self.dp,
            day_high: self.h,
            day_low: self.l,
            day_open_price: self.o,
            previous_close_price: self.pc,
            timestamp: at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            timestamp_utc: at.to_rfc3339(),
        })
    }
}

impl FinnhubClient {
    pub fn new(api_key: SecretString, base_url: impl Into<String>) -> Result<Self, ServiceError> {
        Ok(Self {
            http: http_client(SERVICE)?,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn symbol_lookup(&self, query: &str) -> Result<SymbolLookup, ServiceError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ServiceError::InvalidInput("query must not be empty".to_string()));
        }

        debug!(event_name = "service.finnhub.symbol_lookup", query, "looking up symbol");
        self.get("search", &[("q", query)]).await
    }

    pub async fn quote(&self, symbol: &str) -> Result<StockQuote, ServiceError> {
        let symbol = symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(ServiceError::InvalidInput("symbol must not be empty".to_string()));
        }

        debug!(event_name = "service.finnhub.quote", symbol = %symbol, "fetching quote");
        let raw: RawQuote = self.get("quote", &[("symbol", symbol.as_str())]).await?;
        raw.into_quote()
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ServiceError> {
        let response = self
            .http
            .get(format!("{}/{path}", self.base_url))
            .query(query)
            .query(&[("token", self.api_key.expose_secret())])
            .send()
            .await
            .map_err(|error| ServiceError::Request { service: SERVICE, message: error.to_string() })?;

        check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|error| ServiceError::Decode { service: SERVICE, message: error.to_string() })
    }
}
