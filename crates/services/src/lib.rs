//! Backing API clients used by the tool servers.

pub mod finnhub;
pub mod screening;
pub mod serper;

use std::time::Duration;

use concierge_core::{Classified, ErrorClass};
use thiserror::Error;

pub use finnhub::{FinnhubClient, StockQuote, SymbolLookup, SymbolMatch};
pub use screening::{Assessment, MentalHealthScreener};
pub use serper::SerperClient;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service} request failed: {message}")]
    Request { service: &'static str, message: String },
    #[error("{service} returned status {status}: {body}")]
    Status { service: &'static str, status: u16, body: String },
    #[error("could not decode {service} response: {message}")]
    Decode { service: &'static str, message: String },
    #[error("{0}")]
    InvalidInput(String),
}

impl Classified for ServiceError {
    fn error_class(&self) -> ErrorClass {
        match self {
            Self::InvalidInput(_) => ErrorClass::Internal,
            _ => ErrorClass::Connection,
        }
    }
}

pub(crate) fn http_client(service: &'static str) -> Result<reqwest::Client, ServiceError> {
    reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(8)
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|error| ServiceError::Request { service, message: error.to_string() })
}

/// Maps a non-2xx response to [`ServiceError::Status`], keeping the body for diagnostics.
pub(crate) async fn check_status(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::Status { service, status: status.as_u16(), body })
}
