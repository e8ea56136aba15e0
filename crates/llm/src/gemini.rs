//! Gemini `generateContent` client.
//!
//! Holds one pooled `reqwest::Client` per process; clones share the pool.

use std::time::Duration;

use async_trait::async_trait;
use concierge_core::config::LlmConfig;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error};

use crate::model::{
    Content, FunctionCall, FunctionDeclaration, FunctionResponse, LlmClient, LlmError, LlmRequest,
    LlmResponse, Part, Role, Usage,
};

const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["$schema", "additionalProperties", "title", "default"];

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    pub fn new(
        api_key: SecretString,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let http = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        Ok(Self {
            http,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config.api_key.clone().ok_or(LlmError::MissingApiKey)?;
        Self::new(api_key, config.base_url.clone(), config.model.clone(), config.timeout())
    }

    /// Same connection pool and credentials, different model.
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self { model: model.into(), ..self.clone() }
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = GenerateContentRequest::from_request(request);
        debug!(
            event_name = "llm.gemini.request",
            model = %self.model,
            contents = request.contents.len(),
            tools = request.tools.len(),
            "calling Gemini"
        );

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|error| {
                error!(event_name = "llm.gemini.transport_failed", error = %error, "Gemini request failed");
                LlmError::Transport(error.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_failure(status.as_u16(), &error_text));
        }

        let decoded: GenerateContentResponse =
            response.json().await.map_err(|error| LlmError::Decode(error.to_string()))?;

        decoded.into_response()
    }
}

/// Removes JSON-schema keywords the Gemini API refuses. Property names are
/// left untouched even when they collide with a removed keyword.
pub fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut cleaned = Map::new();
            for (key, value) in map {
                if UNSUPPORTED_SCHEMA_KEYS.contains(&key.as_str()) {
                    continue;
                }
                let value = match (key.as_str(), value) {
                    ("properties", Value::Object(properties)) => Value::Object(
                        properties
                            .iter()
                            .map(|(name, property)| (name.clone(), sanitize_schema(property)))
                            .collect(),
                    ),
                    _ => sanitize_schema(value),
                };
                cleaned.insert(key.clone(), value);
            }
            Value::Object(cleaned)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

fn classify_failure(status: u16, body: &str) -> LlmError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let api_status = envelope.as_ref().and_then(|envelope| envelope.error.status.clone());
    let message = envelope
        .and_then(|envelope| envelope.error.message)
        .unwrap_or_else(|| body.trim().to_string());

    if status == 429 || api_status.as_deref() == Some("RESOURCE_EXHAUSTED") {
        LlmError::RateLimited(message)
    } else {
        error!(event_name = "llm.gemini.api_error", status, message = %message, "Gemini API error");
        LlmError::Api { status, message }
    }
}

fn has_properties(schema: &Value) -> bool {
    schema.get("properties").and_then(Value::as_object).is_some_and(|properties| !properties.is_empty())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

impl GenerateContentRequest {
    fn from_request(request: &LlmRequest) -> Self {
        let system_instruction = request.system_instruction.as_ref().map(|text| WireContent {
            role: None,
            parts: vec![WirePart { text: Some(text.clone()), ..WirePart::default() }],
        });

        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![WireTool {
                function_declarations: request
                    .tools
                    .iter()
                    .map(WireFunctionDeclaration::from_declaration)
                    .collect(),
            }]
        };

        Self {
            contents: request.contents.iter().map(WireContent::from_content).collect(),
            system_instruction,
            tools,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

impl WireContent {
    fn from_content(content: &Content) -> Self {
        Self {
            role: Some(content.role.as_str().to_string()),
            parts: content.parts.iter().map(WirePart::from_part).collect(),
        }
    }

    fn into_content(self) -> Content {
        let role = match self.role.as_deref() {
            Some("user") => Role::User,
            _ => Role::Model,
        };
        let parts = self.parts.into_iter().filter_map(WirePart::into_part).collect();
        Content { role, parts }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<WireFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<WireFunctionResponse>,
}

impl WirePart {
    fn from_part(part: &Part) -> Self {
        match part {
            Part::Text(text) => Self { text: Some(text.clone()), ..Self::default() },
            Part::FunctionCall(call) => Self {
                function_call: Some(WireFunctionCall {
                    name: call.name.clone(),
                    args: call.args.clone(),
                }),
                ..Self::default()
            },
            Part::FunctionResponse(response) => {
                // functionResponse.response has to be a JSON object
                let payload = match &response.response {
                    Value::Object(_) => response.response.clone(),
                    other => json!({ "result": other }),
                };
                Self {
                    function_response: Some(WireFunctionResponse {
                        name: response.name.clone(),
                        response: payload,
                    }),
                    ..Self::default()
                }
            }
        }
    }

    fn into_part(self) -> Option<Part> {
        if let Some(call) = self.function_call {
            let args = if call.args.is_null() { json!({}) } else { call.args };
            return Some(Part::FunctionCall(FunctionCall { name: call.name, args }));
        }
        if let Some(response) = self.function_response {
            return Some(Part::FunctionResponse(FunctionResponse {
                name: response.name,
                response: response.response,
            }));
        }
        self.text.map(Part::Text)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionResponse {
    name: String,
    #[serde(default)]
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTool {
    function_declarations: Vec<WireFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct WireFunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

impl WireFunctionDeclaration {
    fn from_declaration(declaration: &FunctionDeclaration) -> Self {
        let parameters = has_properties(&declaration.parameters)
            .then(|| sanitize_schema(&declaration.parameters));
        Self {
            name: declaration.name.clone(),
            description: declaration.description.clone(),
            parameters,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    usage_metadata: Option<WireUsage>,
}

impl GenerateContentResponse {
    fn into_response(self) -> Result<LlmResponse, LlmError> {
        let usage = self.usage_metadata.map(|usage| Usage {
            prompt_tokens: usage.prompt_token_count,
            candidates_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
        });

        let candidate = self.candidates.into_iter().next().ok_or(LlmError::EmptyResponse)?;
        let content = candidate.content.ok_or(LlmError::EmptyResponse)?.into_content();
        if content.parts.is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        Ok(LlmResponse { content, finish_reason: candidate.finish_reason, usage })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    content: Option<WireContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUsage {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
    total_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}
