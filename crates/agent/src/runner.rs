use std::sync::Arc;

use concierge_core::{Classified, ErrorClass};
use concierge_llm::{Content, FunctionCall, FunctionResponse, LlmRequest, Part, Role};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::{Agent, TRANSFER_TOOL_NAME};
use crate::session::{Event, InMemorySessionService, SessionError};

/// Upper bound on model calls within one turn.
pub const DEFAULT_MAX_LLM_CALLS: usize = 16;

const EVENT_CAPACITY: usize = 32;
const USER_AUTHOR: &str = "user";

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("message must contain at least one part")]
    EmptyMessage,
}

impl Classified for RunnerError {
    fn error_class(&self) -> ErrorClass {
        ErrorClass::Internal
    }
}

/// Drives turns of an agent tree against an in-memory session store.
#[derive(Clone)]
pub struct Runner {
    app_name: String,
    root: Arc<Agent>,
    sessions: Arc<InMemorySessionService>,
    max_llm_calls: usize,
}

impl Runner {
    pub fn new(app_name: impl Into<String>, root: Agent, sessions: Arc<InMemorySessionService>) -> Self {
        Self {
            app_name: app_name.into(),
            root: Arc::new(root),
            sessions,
            max_llm_calls: DEFAULT_MAX_LLM_CALLS,
        }
    }

    pub fn with_max_llm_calls(mut self, max_llm_calls: usize) -> Self {
        self.max_llm_calls = max_llm_calls.max(1);
        self
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn sessions(&self) -> &Arc<InMemorySessionService> {
        &self.sessions
    }

    /// Starts a turn for `message` and returns the stream of events it
    /// produces. The stream ends after the final event.
    pub async fn run(
        &self,
        user_id: &str,
        session_id: &str,
        message: Content,
    ) -> Result<mpsc::Receiver<Event>, RunnerError> {
        if message.parts.is_empty() {
            return Err(RunnerError::EmptyMessage);
        }
        if self.sessions.get_session(&self.app_name, user_id, session_id).await.is_none() {
            return Err(SessionError::NotFound {
                app_name: self.app_name.clone(),
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
            }
            .into());
        }

        let (events, receiver) = mpsc::channel(EVENT_CAPACITY);
        let turn = Turn {
            runner: self.clone(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            invocation_id: format!("e-{}", Uuid::new_v4()),
            events,
        };
        tokio::spawn(turn.drive(message));
        Ok(receiver)
    }
}

struct Turn {
    runner: Runner,
    user_id: String,
    session_id: String,
    invocation_id: String,
    events: mpsc::Sender<Event>,
}

impl Turn {
    async fn drive(self, message: Content) {
        info!(
            event_name = "agent.runner.turn_started",
            invocation_id = %self.invocation_id,
            session_id = %self.session_id,
            "turn started"
        );

        if let Err(failure) = self.run(message).await {
            error!(
                event_name = "agent.runner.turn_aborted",
                invocation_id = %self.invocation_id,
                error = %failure,
                "turn aborted"
            );
            let event = self.failure(self.runner.root.name(), failure.to_string());
            let _ = self.events.send(event).await;
        }
    }

    async fn run(&self, message: Content) -> Result<(), SessionError> {
        self.append(Event::new(&self.invocation_id, USER_AUTHOR).with_content(message)).await?;

        // Active agent is last; earlier entries are its ancestors.
        let mut path: Vec<Arc<Agent>> = vec![Arc::clone(&self.runner.root)];
        let mut llm_calls = 0;

        while let Some(agent) = path.last().cloned() {
            if self.events.is_closed() {
                debug!(event_name = "agent.runner.receiver_dropped", "event receiver dropped, ending turn");
                return Ok(());
            }
            if llm_calls >= self.runner.max_llm_calls {
                warn!(
                    event_name = "agent.runner.call_limit",
                    agent = %agent.name(),
                    max_llm_calls = self.runner.max_llm_calls,
                    "model call limit reached"
                );
                let message = format!(
                    "exceeded the limit of {} model calls in one turn",
                    self.runner.max_llm_calls
                );
                return self.emit(self.failure(agent.name(), message)).await;
            }
            llm_calls += 1;

            let parent = path.len().checked_sub(2).map(|position| Arc::clone(&path[position]));
            let targets: Vec<&Agent> = agent
                .sub_agents()
                .iter()
                .map(|child| child.as_ref())
                .chain(parent.as_deref())
                .collect();

            let session = self
                .runner
                .sessions
                .get_session(&self.runner.app_name, &self.user_id, &self.session_id)
                .await
                .ok_or_else(|| self.not_found())?;
            let request = LlmRequest {
                system_instruction: Some(agent.system_instruction(&targets)),
                contents: contents_for(agent.name(), &session.events),
                tools: agent.declarations(&targets),
            };

            debug!(
                event_name = "agent.runner.model_call",
                agent = %agent.name(),
                call = llm_calls,
                contents = request.contents.len(),
                "calling model"
            );
            let response = match agent.model().generate(&request).await {
                Ok(response) => response,
                Err(failure) => {
                    error!(
                        event_name = "agent.runner.model_failed",
                        agent = %agent.name(),
                        error_class = failure.error_class().as_str(),
                        error = %failure,
                        "model call failed"
                    );
                    return self.emit(self.failure(agent.name(), failure.to_string())).await;
                }
            };

            let calls: Vec<FunctionCall> =
                response.content.function_calls().into_iter().cloned().collect();
            let mut event = Event::new(&self.invocation_id, agent.name()).with_content(response.content);

            if calls.is_empty() {
                if let (Some(key), Some(text)) = (agent.output_key(), event.text()) {
                    event.actions.state_delta.insert(key.to_string(), Value::String(text));
                }
                info!(
                    event_name = "agent.runner.turn_completed",
                    invocation_id = %self.invocation_id,
                    agent = %agent.name(),
                    llm_calls,
                    "final response produced"
                );
                return self.emit(event).await;
            }
            self.emit(event).await?;

            let (parts, transfer) = self.execute_calls(&agent, &targets, &calls).await;
            let mut responses =
                Event::new(&self.invocation_id, agent.name()).with_content(Content { role: Role::User, parts });
            responses.actions.transfer_to_agent = transfer.clone();
            self.emit(responses).await?;

            if let Some(target) = transfer {
                info!(
                    event_name = "agent.runner.transferred",
                    from = %agent.name(),
                    to = %target,
                    "agent transfer"
                );
                if parent.as_ref().is_some_and(|parent| parent.name() == target) {
                    path.pop();
                } else if let Some(child) = agent.sub_agent(&target) {
                    path.push(Arc::clone(child));
                }
            }
        }

        Ok(())
    }

    /// Runs the calls in order. Only the first valid transfer is honoured.
    async fn execute_calls(
        &self,
        agent: &Agent,
        targets: &[&Agent],
        calls: &[FunctionCall],
    ) -> (Vec<Part>, Option<String>) {
        let mut parts = Vec::with_capacity(calls.len());
        let mut transfer = None;

        for call in calls {
            let response = if call.name == TRANSFER_TOOL_NAME {
                let requested = call.args.get("agent_name").and_then(Value::as_str);
                match requested {
                    Some(name) if transfer.is_none() && targets.iter().any(|target| target.name() == name) => {
                        transfer = Some(name.to_string());
                        json!({ "result": format!("Transferred to agent `{name}`.") })
                    }
                    Some(name) => json!({ "error": format!("cannot transfer to agent `{name}`") }),
                    None => json!({ "error": "missing `agent_name` argument" }),
                }
            } else {
                match agent.tools().get(&call.name) {
                    None => {
                        warn!(
                            event_name = "agent.runner.unknown_tool",
                            agent = %agent.name(),
                            tool = %call.name,
                            "model called an unknown tool"
                        );
                        json!({ "error": format!("tool `{}` is not available to agent `{}`", call.name, agent.name()) })
                    }
                    Some(tool) => match tool.execute(call.args.clone()).await {
                        Ok(value @ Value::Object(_)) => value,
                        Ok(other) => json!({ "result": other }),
                        Err(failure) => {
                            warn!(
                                event_name = "agent.runner.tool_failed",
                                agent = %agent.name(),
                                tool = %call.name,
                                error = %failure,
                                "tool execution failed"
                            );
                            json!({ "error": format!("{failure:#}") })
                        }
                    },
                }
            };

            parts.push(Part::FunctionResponse(FunctionResponse { name: call.name.clone(), response }));
        }

        (parts, transfer)
    }

    fn failure(&self, author: &str, message: String) -> Event {
        let mut event = Event::new(&self.invocation_id, author);
        event.error = Some(message);
        event.actions.escalate = true;
        event
    }

    fn not_found(&self) -> SessionError {
        SessionError::NotFound {
            app_name: self.runner.app_name.clone(),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
        }
    }

    async fn append(&self, event: Event) -> Result<(), SessionError> {
        self.runner
            .sessions
            .append_event(&self.runner.app_name, &self.user_id, &self.session_id, event)
            .await
    }

    /// Records the event, then hands it to the caller.
    async fn emit(&self, event: Event) -> Result<(), SessionError> {
        self.append(event.clone()).await?;
        if self.events.send(event).await.is_err() {
            debug!(event_name = "agent.runner.receiver_dropped", "event receiver dropped");
        }
        Ok(())
    }
}

/// History as seen by `agent_name`. Messages from other agents are replayed
/// as user-side context so the model never sees calls to functions it was
/// not given.
fn contents_for(agent_name: &str, events: &[Event]) -> Vec<Content> {
    events
        .iter()
        .filter_map(|event| {
            let content = event.content.as_ref()?;
            if event.author == USER_AUTHOR || event.author == agent_name {
                Some(content.clone())
            } else {
                Some(as_context(&event.author, content))
            }
        })
        .collect()
}

fn as_context(author: &str, content: &Content) -> Content {
    let mut parts = vec![Part::Text("For context:".to_string())];
    for part in &content.parts {
        let text = match part {
            Part::Text(text) if text.trim().is_empty() => continue,
            Part::Text(text) => format!("[{author}] said: {text}"),
            Part::FunctionCall(call) => {
                format!("[{author}] called tool `{}` with parameters: {}", call.name, call.args)
            }
            Part::FunctionResponse(response) => {
                format!("[{author}] `{}` tool returned result: {}", response.name, response.response)
            }
        };
        parts.push(Part::Text(text));
    }
    Content { role: Role::User, parts }
}
