use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use concierge_core::{Classified, ErrorClass};
use concierge_llm::{FunctionDeclaration, LlmClient};
use serde_json::json;
use thiserror::Error;

use crate::tools::{Tool, ToolRegistry, ToolRegistryError};

/// Function offered to agents that can hand the turn to another agent.
pub const TRANSFER_TOOL_NAME: &str = "transfer_to_agent";

/// Author name reserved for user events.
const USER_AUTHOR: &str = "user";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("agent name must not be empty")]
    EmptyName,
    #[error("agent name `{0}` must start with a letter or `_` and contain only letters, digits and `_`")]
    InvalidName(String),
    #[error("agent name `{0}` is reserved")]
    ReservedName(String),
    #[error("agent name `{0}` is used more than once in the agent tree")]
    DuplicateAgent(String),
    #[error("agent `{agent}` declares the reserved tool `transfer_to_agent`")]
    ReservedToolName { agent: String },
    #[error("agent `{agent}`: {source}")]
    Tool {
        agent: String,
        #[source]
        source: ToolRegistryError,
    },
}

impl Classified for AgentError {
    fn error_class(&self) -> ErrorClass {
        ErrorClass::Internal
    }
}

/// A model plus the instruction, tools and sub-agents it works with.
pub struct Agent {
    name: String,
    description: String,
    instruction: String,
    model: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    sub_agents: Vec<Arc<Agent>>,
    output_key: Option<String>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model.model_name())
            .field("tools", &self.tools.names())
            .field("sub_agents", &self.sub_agents.iter().map(|agent| agent.name()).collect::<Vec<_>>())
            .field("output_key", &self.output_key)
            .finish()
    }
}

impl Agent {
    pub fn builder(name: impl Into<String>, model: Arc<dyn LlmClient>) -> AgentBuilder {
        AgentBuilder {
            name: name.into(),
            model,
            description: String::new(),
            instruction: String::new(),
            tools: Vec::new(),
            sub_agents: Vec::new(),
            output_key: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn model(&self) -> &Arc<dyn LlmClient> {
        &self.model
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn sub_agents(&self) -> &[Arc<Agent>] {
        &self.sub_agents
    }

    pub fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    pub fn sub_agent(&self, name: &str) -> Option<&Arc<Agent>> {
        self.sub_agents.iter().find(|agent| agent.name == name)
    }

    /// Searches this agent and all of its descendants.
    pub fn find_agent(&self, name: &str) -> Option<&Agent> {
        if self.name == name {
            return Some(self);
        }
        self.sub_agents.iter().find_map(|agent| agent.find_agent(name))
    }

    fn collect_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        names.push(&self.name);
        for agent in &self.sub_agents {
            agent.collect_names(names);
        }
    }

    /// Instruction sent as the system prompt, including the transfer
    /// directions when `targets` is not empty.
    pub(crate) fn system_instruction(&self, targets: &[&Agent]) -> String {
        let mut prompt = format!("You are an agent. Your internal name is \"{}\".", self.name);
        if !self.description.is_empty() {
            prompt.push_str(&format!(" The description about you is \"{}\".", self.description));
        }
        if !self.instruction.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&self.instruction);
        }
        if targets.is_empty() {
            return prompt;
        }

        prompt.push_str("\n\nYou have a list of other agents to transfer to:\n");
        for agent in targets {
            prompt.push_str(&format!(
                "\nAgent name: {}\nAgent description: {}\n",
                agent.name, agent.description
            ));
        }
        prompt.push_str(&format!(
            "\nIf you are the best to answer the question according to your description, answer it yourself.\n\
             If another agent is better suited according to its description, call the `{TRANSFER_TOOL_NAME}` \
             function with that agent's name. When transferring, do not generate any text other than the function call."
        ));
        prompt
    }

    pub(crate) fn declarations(&self, targets: &[&Agent]) -> Vec<FunctionDeclaration> {
        let mut declarations = self.tools.declarations();
        if !targets.is_empty() {
            let names: Vec<&str> = targets.iter().map(|agent| agent.name()).collect();
            declarations.push(FunctionDeclaration {
                name: TRANSFER_TOOL_NAME.to_string(),
                description: "Transfer the question to another agent.".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "agent_name": {
                            "type": "string",
                            "description": format!("Name of the agent to transfer to, one of: {}", names.join(", "))
                        }
                    },
                    "required": ["agent_name"]
                }),
            });
        }
        declarations
    }
}

pub struct AgentBuilder {
    name: String,
    model: Arc<dyn LlmClient>,
    description: String,
    instruction: String,
    tools: Vec<Arc<dyn Tool>>,
    sub_agents: Vec<Agent>,
    output_key: Option<String>,
}

impl AgentBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn tool<T>(mut self, tool: T) -> Self
    where
        T: Tool + 'static,
    {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn sub_agent(mut self, agent: Agent) -> Self {
        self.sub_agents.push(agent);
        self
    }

    /// Session state key that receives this agent's final reply text.
    pub fn output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        validate_name(&self.name)?;

        let mut registry = ToolRegistry::default();
        for tool in self.tools {
            if tool.name() == TRANSFER_TOOL_NAME {
                return Err(AgentError::ReservedToolName { agent: self.name });
            }
            registry
                .register_shared(tool)
                .map_err(|source| AgentError::Tool { agent: self.name.clone(), source })?;
        }

        let agent = Agent {
            name: self.name,
            description: self.description,
            instruction: self.instruction,
            model: self.model,
            tools: registry,
            sub_agents: self.sub_agents.into_iter().map(Arc::new).collect(),
            output_key: self.output_key,
        };

        let mut names = Vec::new();
        agent.collect_names(&mut names);
        let mut seen = HashSet::new();
        if let Some(duplicate) = names.into_iter().find(|name| !seen.insert(*name)) {
            return Err(AgentError::DuplicateAgent(duplicate.to_string()));
        }

        Ok(agent)
    }
}

fn validate_name(name: &str) -> Result<(), AgentError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(AgentError::EmptyName);
    };
    let valid = (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(AgentError::InvalidName(name.to_string()));
    }
    if name == USER_AUTHOR {
        return Err(AgentError::ReservedName(name.to_string()));
    }
    Ok(())
}
