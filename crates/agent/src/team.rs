//! The concrete agent trees the CLI runs.

use std::sync::Arc;

use concierge_llm::LlmClient;

use crate::agent::{Agent, AgentError};
use crate::tools::Tool;

pub const ASSISTANT_NAME: &str = "enterprise_assistant";
pub const STOCK_AGENT_NAME: &str = "agent_stock_analysis";
pub const SEARCH_AGENT_NAME: &str = "agent_search_google";
pub const RESEARCHER_NAME: &str = "search_agent";
pub const ASSISTANT_OUTPUT_KEY: &str = "last_assistant_response";

const STOCK_INSTRUCTION: &str = "Perform in-depth analysis of stock data and return key financial insights, including the latest market price.";
const STOCK_DESCRIPTION: &str = "Specializes in analyzing stock market data and generating financial insights. Retrieves and reports on the most recent stock prices.";

const SEARCH_INSTRUCTION: &str = "First, use 'search_google' to find relevant web pages for the user's query. \
If initial search results are sufficient, summarize them. If more detail is needed, use 'get_page_text' on the most \
promising URLs (up to 2-3 pages). Consolidate all gathered information into a single, comprehensive answer. Avoid \
making separate responses for each piece of information. Your goal is to provide a complete answer in one go after \
gathering and processing all necessary information.";
const SEARCH_DESCRIPTION: &str = "Handles open-ended queries by performing Google searches, reading content from web pages, and synthesizing the information.";

const ASSISTANT_DESCRIPTION: &str = "Root assistant: Handles requests about stocks, company information, and user well-being by first performing a mental health check.";
const ASSISTANT_DESCRIPTION_NO_SCREENING: &str = "Root assistant: Handles requests about stocks and company information.";

const ASSISTANT_INSTRUCTION: &str = "You are the primary assistant orchestrating a team of expert agents. Your process for EVERY user query is:\n\
1. **Mental Health Check (ALWAYS Perform First):** Use your 'perform_mental_health_check' tool with the original user query to assess for potential mental health concerns. Store this assessment.\n\
2. **Address Primary Request:** After the health check, proceed to address the user's main query. This may involve:\n    \
a. Providing comprehensive reports on companies directly if the information is straightforward.\n    \
b. For stock price or market trend insights, delegate to 'agent_stock_analysis'.\n    \
c. For general or real-time information, delegate to 'agent_search_google'.\n\
3. **Formulate Final Response:** Consolidate all information. If the 'perform_mental_health_check' tool indicated a concern, its supportive message MUST be included prominently and respectfully at the BEGINNING of your overall response. Then, provide the answer to the user's primary request based on step 2.\n\
Carefully interpret the user's intent for step 2, decide whether to handle it directly or delegate, and respond accordingly.\n\
When uncertain about step 2, ask the user for clarification. Only use tools or delegate tasks as defined.";

const ASSISTANT_INSTRUCTION_NO_SCREENING: &str = "You are the primary assistant orchestrating a team of expert agents. For every user query:\n\
1. Provide comprehensive reports on companies directly if the information is straightforward.\n\
2. For stock price or market trend insights, delegate to 'agent_stock_analysis'.\n\
3. For general or real-time information, delegate to 'agent_search_google'.\n\
Carefully interpret the user's intent, decide whether to handle it directly or delegate, and respond accordingly.\n\
When uncertain, ask the user for clarification. Only use tools or delegate tasks as defined.";

const RESEARCHER_DESCRIPTION: &str = "agent with google search capabilities";
const RESEARCHER_INSTRUCTION: &str = "You are an expert researcher. You always respond to requests with facts that have been verified through an online search.";

/// Tools discovered on each tool server. Empty groups are allowed.
#[derive(Clone, Default)]
pub struct TeamTools {
    pub search: Vec<Arc<dyn Tool>>,
    pub stock: Vec<Arc<dyn Tool>>,
    pub screening: Vec<Arc<dyn Tool>>,
}

/// Root assistant delegating to the stock and search agents. The screening
/// step is only part of the instruction when screening tools are present.
pub fn build_assistant(model: Arc<dyn LlmClient>, tools: TeamTools) -> Result<Agent, AgentError> {
    let stock = Agent::builder(STOCK_AGENT_NAME, Arc::clone(&model))
        .description(STOCK_DESCRIPTION)
        .instruction(STOCK_INSTRUCTION)
        .tools(tools.stock)
        .build()?;

    let search = Agent::builder(SEARCH_AGENT_NAME, Arc::clone(&model))
        .description(SEARCH_DESCRIPTION)
        .instruction(SEARCH_INSTRUCTION)
        .tools(tools.search)
        .build()?;

    let (description, instruction) = if tools.screening.is_empty() {
        (ASSISTANT_DESCRIPTION_NO_SCREENING, ASSISTANT_INSTRUCTION_NO_SCREENING)
    } else {
        (ASSISTANT_DESCRIPTION, ASSISTANT_INSTRUCTION)
    };

    Agent::builder(ASSISTANT_NAME, model)
        .description(description)
        .instruction(instruction)
        .tools(tools.screening)
        .sub_agent(search)
        .sub_agent(stock)
        .output_key(ASSISTANT_OUTPUT_KEY)
        .build()
}

/// Single agent answering from web search results.
pub fn build_researcher(
    model: Arc<dyn LlmClient>,
    search_tools: Vec<Arc<dyn Tool>>,
) -> Result<Agent, AgentError> {
    Agent::builder(RESEARCHER_NAME, model)
        .description(RESEARCHER_DESCRIPTION)
        .instruction(RESEARCHER_INSTRUCTION)
        .tools(search_tools)
        .build()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use async_trait::async_trait;
    use concierge_llm::{Content, LlmClient, LlmError, LlmRequest, LlmResponse};
    use serde_json::{json, Value};

    use super::{build_assistant, build_researcher, TeamTools, ASSISTANT_NAME, ASSISTANT_OUTPUT_KEY};
    use crate::tools::Tool;

    struct Idle;

    #[async_trait]
    impl LlmClient for Idle {
        fn model_name(&self) -> &str {
            "idle"
        }

        async fn generate(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
            Ok(LlmResponse { content: Content::model_text("ok"), finish_reason: None, usage: None })
        }
    }

    struct Stub(&'static str);

    #[async_trait]
    impl Tool for Stub {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "stub"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _input: Value) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    fn tools(names: &[&'static str]) -> Vec<Arc<dyn Tool>> {
        names.iter().map(|&name| Arc::new(Stub(name)) as Arc<dyn Tool>).collect()
    }

    #[test]
    fn assistant_tree_matches_the_delegation_layout() {
        let assistant = build_assistant(
            Arc::new(Idle),
            TeamTools {
                search: tools(&["search_google", "get_page_text"]),
                stock: tools(&["lookup_symbol", "get_stock_price"]),
                screening: tools(&["perform_mental_health_check"]),
            },
        )
        .expect("assistant");

        assert_eq!(assistant.name(), ASSISTANT_NAME);
        assert_eq!(assistant.output_key(), Some(ASSISTANT_OUTPUT_KEY));
        assert_eq!(assistant.tools().names(), ["perform_mental_health_check"]);
        assert!(assistant.instruction().contains("ALWAYS Perform First"));

        let children: Vec<&str> = assistant.sub_agents().iter().map(|agent| agent.name()).collect();
        assert_eq!(children, ["agent_search_google", "agent_stock_analysis"]);
        let stock = assistant.sub_agent("agent_stock_analysis").expect("stock agent");
        assert_eq!(stock.tools().names(), ["lookup_symbol", "get_stock_price"]);
    }

    #[test]
    fn assistant_without_screening_skips_the_health_check_step() {
        let assistant = build_assistant(Arc::new(Idle), TeamTools::default()).expect("assistant");

        assert!(assistant.tools().is_empty());
        assert!(!assistant.instruction().contains("perform_mental_health_check"));
        assert!(assistant.instruction().contains("agent_stock_analysis"));
    }

    #[test]
    fn researcher_is_a_single_search_agent() {
        let researcher =
            build_researcher(Arc::new(Idle), tools(&["search_google", "get_page_text"])).expect("researcher");

        assert_eq!(researcher.name(), "search_agent");
        assert!(researcher.sub_agents().is_empty());
        assert!(researcher.instruction().starts_with("You are an expert researcher."));
        assert_eq!(researcher.tools().len(), 2);
    }
}
