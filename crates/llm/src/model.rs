use std::sync::Arc;

use async_trait::async_trait;
use concierge_core::{Classified, ErrorClass};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Part {
    Text(String),
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self { role: Role::User, parts: vec![Part::Text(text.into())] }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self { role: Role::Model, parts: vec![Part::Text(text.into())] }
    }

    /// Concatenated text parts, or `None` when the content carries no text.
    pub fn text(&self) -> Option<String> {
        let texts: Vec<&str> = self
            .parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();

        if texts.is_empty() {
            None
        } else {
            Some(texts.concat())
        }
    }

    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::FunctionCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    pub fn function_responses(&self) -> Vec<&FunctionResponse> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::FunctionResponse(response) => Some(response),
                _ => None,
            })
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LlmRequest {
    pub system_instruction: Option<String>,
    pub contents: Vec<Content>,
    pub tools: Vec<FunctionDeclaration>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub candidates_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LlmResponse {
    pub content: Content,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("model API returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("model transport failure: {0}")]
    Transport(String),
    #[error("could not decode model response: {0}")]
    Decode(String),
    #[error("model returned no candidates")]
    EmptyResponse,
    #[error("model API key is not configured")]
    MissingApiKey,
}

impl LlmError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

impl Classified for LlmError {
    fn error_class(&self) -> ErrorClass {
        match self {
            Self::MissingApiKey => ErrorClass::Configuration,
            _ => ErrorClass::Agent,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;
}

#[async_trait]
impl<C: LlmClient + ?Sized> LlmClient for Arc<C> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).generate(request).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Content, FunctionCall, Part, Role};

    #[test]
    fn text_joins_only_text_parts() {
        let content = Content {
            role: Role::Model,
            parts: vec![
                Part::Text("Checking ".to_string()),
                Part::FunctionCall(FunctionCall {
                    name: "get_stock_price".to_string(),
                    args: json!({"symbol": "AAPL"}),
                }),
                Part::Text("the quote.".to_string()),
            ],
        };

        assert_eq!(content.text().as_deref(), Some("Checking the quote."));
        assert_eq!(content.function_calls().len(), 1);
        assert_eq!(content.function_calls()[0].name, "get_stock_price");
    }

    #[test]
    fn content_without_text_has_no_text() {
        let content = Content {
            role: Role::Model,
            parts: vec![Part::FunctionCall(FunctionCall {
                name: "lookup_symbol".to_string(),
                args: json!({}),
            })],
        };

        assert_eq!(content.text(), None);
        assert_eq!(Role::User.as_str(), "user");
    }
}
