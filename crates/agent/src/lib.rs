//! Agent runtime - model-driven tool use and delegation
//!
//! This crate is the part of concierge that turns a user message into an
//! answer:
//! - `tools` adapts local functions and remote MCP tools behind one trait
//! - `agent` binds a model, an instruction, tools and sub-agents
//! - `session` keeps the in-memory conversation history and state
//! - `runner` drives one turn, executing function calls and transfers
//! - `team` assembles the concrete assistant and researcher agents
//!
//! # Turn loop
//!
//! 1. The user message is appended to the session.
//! 2. The active agent's model sees the history and its tool declarations.
//! 3. Function calls are executed and their responses appended.
//! 4. `transfer_to_agent` hands the turn to another agent.
//! 5. A reply without function calls ends the turn.

pub mod agent;
pub mod runner;
pub mod session;
pub mod team;
pub mod tools;

pub use agent::{Agent, AgentBuilder, AgentError, TRANSFER_TOOL_NAME};
pub use runner::{Runner, RunnerError, DEFAULT_MAX_LLM_CALLS};
pub use session::{Event, EventActions, InMemorySessionService, Session, SessionError};
pub use team::{build_assistant, build_researcher, TeamTools};
pub use tools::{register_mcp_tools, McpTool, Tool, ToolRegistry, ToolRegistryError};
