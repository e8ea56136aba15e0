use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{check_status, http_client, ServiceError};

const SERVICE: &str = "serper";

/// Serper client for Google search and page scraping.
#[derive(Clone)]
pub struct SerperClient {
    http: Client,
    api_key: SecretString,
    search_url: String,
    scrape_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic: Vec<Value>,
}

impl SerperClient {
    pub fn new(
        api_key: SecretString,
        search_url: impl Into<String>,
        scrape_url: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            http: http_client(SERVICE)?,
            api_key,
            search_url: search_url.into(),
            scrape_url: scrape_url.into(),
        })
    }

    /// Organic results only; each entry keeps every field Serper returns
    /// (title, link, snippet, date, position, sitelinks ...).
    pub async fn search(
        &self,
        query: &str,
        n_results: u32,
        page: u32,
    ) -> Result<Vec<Value>, ServiceError> {
        if query.trim().is_empty() {
            return Err(ServiceError::InvalidInput("query must not be empty".to_string()));
        }

        debug!(event_name = "service.serper.search", query, n_results, page, "searching");
        let response = self
            .post(&self.search_url, json!({"q": query, "num": n_results, "page": page}))
            .await?;

        let decoded: SearchResponse = response
            .json()
            .await
            .map_err(|error| ServiceError::Decode { service: SERVICE, message: error.to_string() })?;
        Ok(decoded.organic)
    }

    /// Raw body of the scrape endpoint.
    pub async fn scrape(&self, url: &str) -> Result<String, ServiceError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ServiceError::InvalidInput(format!("`{url}` is not an http(s) URL")));
        }

        debug!(event_name = "service.serper.scrape", url, "scraping page");
        self.post(&self.scrape_url, json!({"url": url}))
            .await?
            .text()
            .await
            .map_err(|error| ServiceError::Decode { service: SERVICE, message: error.to_string() })
    }

    async fn post(&self, url: &str, body: Value) -> Result<reqwest::Response, ServiceError> {
        let response = self
            .http
            .post(url)
            .header("X-API-KEY", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|error| ServiceError::Request { service: SERVICE, message: error.to_string() })?;
        check_status(SERVICE, response).await
    }
}
