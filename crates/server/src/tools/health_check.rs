use async_trait::async_trait;
use concierge_mcp::{parse_arguments, ToolCallError, ToolDefinition, ToolHandler, ToolOutput};
use concierge_services::MentalHealthScreener;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::json_output;

pub struct PerformMentalHealthCheck {
    screener: MentalHealthScreener,
}

impl PerformMentalHealthCheck {
    pub fn new(screener: MentalHealthScreener) -> Self {
        Self { screener }
    }
}

#[derive(Deserialize)]
struct CheckArgs {
    user_query: String,
}

#[async_trait]
impl ToolHandler for PerformMentalHealthCheck {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "perform_mental_health_check".to_string(),
            description: "Analyzes the user's query for potential signs of mental health distress \
                          (e.g., depression, anxiety, extreme stress). Returns a brief assessment."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "user_query": {"type": "string", "description": "The text query from the user."}
                },
                "required": ["user_query"]
            }),
        }
    }

    /// Model failures still produce an assessment, so this only fails on bad arguments.
    async fn call(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolCallError> {
        let args: CheckArgs = parse_arguments(arguments)?;
        let assessment = self.screener.assess(&args.user_query).await;
        json_output(&assessment)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use concierge_llm::{Content, LlmClient, LlmError, LlmRequest, LlmResponse};
    use concierge_mcp::{ToolHandler, ToolOutput};
    use concierge_services::screening::SCREENING_FALLBACK;
    use concierge_services::MentalHealthScreener;
    use serde_json::{json, Map};

    use super::PerformMentalHealthCheck;

    struct Fixed(Result<&'static str, ()>);

    #[async_trait]
    impl LlmClient for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            match self.0 {
                Ok(text) => Ok(LlmResponse { content: Content::model_text(text), finish_reason: None, usage: None }),
                Err(()) => Err(LlmError::Api { status: 500, message: "backend error".to_string() }),
            }
        }
    }

    fn tool(reply: Result<&'static str, ()>) -> PerformMentalHealthCheck {
        PerformMentalHealthCheck::new(MentalHealthScreener::new(Arc::new(Fixed(reply))))
    }

    #[tokio::test]
    async fn assessment_is_wrapped_in_an_object() {
        let mut arguments = Map::new();
        arguments.insert("user_query".to_string(), json!("I lost my job and feel hopeless"));

        let output = tool(Ok("It sounds like you might be going through a difficult time."))
            .call(arguments)
            .await
            .expect("assessment");

        assert_eq!(
            output,
            ToolOutput::Json(json!({
                "assessment_text": "It sounds like you might be going through a difficult time."
            }))
        );
    }

    #[tokio::test]
    async fn model_errors_still_answer() {
        let mut arguments = Map::new();
        arguments.insert("user_query".to_string(), json!("What is AAPL at?"));

        let output = tool(Err(())).call(arguments).await.expect("fallback");

        assert_eq!(output, ToolOutput::Json(json!({ "assessment_text": SCREENING_FALLBACK })));
    }
}
