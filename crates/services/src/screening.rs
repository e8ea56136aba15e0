use std::sync::Arc;

use concierge_llm::{Content, LlmClient, LlmRequest};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

pub const SCREENING_INSTRUCTION: &str = "You are a specialized assistant focused on identifying potential signs of adverse mental health \
effects in user queries. Your primary goal is to analyze the user's text for indicators \
of depression, anxiety, or extreme stress. \n\
Key areas to monitor:\n\
1. Explicit mentions of distress: Look for keywords such as 'suicide', 'hopeless', 'worthless', 'overwhelmed', 'panic attack'.\n\
2. Indicators of significant life stressors: Pay attention to phrases related to 'scam', severe 'financial issues', 'job loss', 'debt', or serious 'health issues'.\n\
3. Sentiment Analysis: Perform a sentiment analysis of the query to gauge the overall emotional tone.\n\
Response Protocol:\n\
- If signs of adverse mental health are detected: Respond with a brief, gentle, and supportive message. \
  For example: 'It sounds like you might be going through a difficult time. Please consider reaching out to a mental health professional or a trusted person for support.' \
  You can also suggest looking for local mental health resources. **Do not attempt to diagnose or provide therapy.**\n\
- If no significant signs are detected: Indicate that the query does not seem to raise immediate mental health concerns from your analysis. \
  For example: 'Based on your query, I don't detect immediate signs of mental health distress from my analysis.'\n\
- If the query is ambiguous or you are unsure: It's better to err on the side of caution and provide a gentle supportive message, or state that the query is difficult to assess from a mental health perspective without more context.\n\
Your response should be concise and focused solely on this mental health check aspect. Do not engage in conversation beyond this assessment. Return only the assessment text.";

pub const SCREENING_FALLBACK: &str =
    "I encountered an issue while trying to assess the query. Please try again later.";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub assessment_text: String,
}

/// Screens a user query for signs of distress with a single model call.
#[derive(Clone)]
pub struct MentalHealthScreener {
    model: Arc<dyn LlmClient>,
}

impl MentalHealthScreener {
    pub fn new(model: Arc<dyn LlmClient>) -> Self {
        Self { model }
    }

    pub fn prompt(user_query: &str) -> String {
        format!("{SCREENING_INSTRUCTION}\n\nUser Query: \"{user_query}\"\n\nAssessment:")
    }

    /// Never fails: a model error yields the fallback assessment.
    pub async fn assess(&self, user_query: &str) -> Assessment {
        let request = LlmRequest {
            system_instruction: None,
            contents: vec![Content::user_text(Self::prompt(user_query))],
            tools: Vec::new(),
        };

        match self.model.generate(&request).await {
            Ok(response) => {
                let text = response.content.text().unwrap_or_default();
                info!(
                    event_name = "service.screening.assessed",
                    model = %self.model.model_name(),
                    chars = text.len(),
                    "screening complete"
                );
                Assessment { assessment_text: text.trim().to_string() }
            }
            Err(error) => {
                error!(
                    event_name = "service.screening.failed",
                    model = %self.model.model_name(),
                    error = %error,
                    "error during mental health check"
                );
                Assessment { assessment_text: SCREENING_FALLBACK.to_string() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use concierge_llm::{Content, LlmClient, LlmError, LlmRequest, LlmResponse};

    use super::{MentalHealthScreener, SCREENING_FALLBACK};

    struct CannedModel {
        reply: Option<String>,
        seen: Mutex<Vec<LlmRequest>>,
    }

    #[async_trait]
    impl LlmClient for CannedModel {
        fn model_name(&self) -> &str {
            "canned"
        }

        async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            self.seen.lock().expect("lock").push(request.clone());
            match &self.reply {
                Some(text) => Ok(LlmResponse {
                    content: Content::model_text(text.clone()),
                    finish_reason: None,
                    usage: None,
                }),
                None => Err(LlmError::RateLimited("quota".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn assessment_is_trimmed_model_text() {
        let model = Arc::new(CannedModel {
            reply: Some("  No immediate concerns detected.\n".to_string()),
            seen: Mutex::new(Vec::new()),
        });
        let screener = MentalHealthScreener::new(model.clone());

        let assessment = screener.assess("What is the price of AAPL?").await;

        assert_eq!(assessment.assessment_text, "No immediate concerns detected.");
        let seen = model.seen.lock().expect("lock");
        let prompt = seen[0].contents[0].text().expect("prompt text");
        assert!(prompt.ends_with("User Query: \"What is the price of AAPL?\"\n\nAssessment:"));
        assert!(prompt.starts_with("You are a specialized assistant"));
    }

    #[tokio::test]
    async fn model_failure_returns_the_apology() {
        let screener = MentalHealthScreener::new(Arc::new(CannedModel {
            reply: None,
            seen: Mutex::new(Vec::new()),
        }));

        assert_eq!(screener.assess("I feel hopeless").await.assessment_text, SCREENING_FALLBACK);
    }
}
