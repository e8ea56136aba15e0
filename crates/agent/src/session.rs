use std::collections::HashMap;

use chrono::{DateTime, Utc};
use concierge_core::{Classified, ErrorClass};
use concierge_llm::Content;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EventActions {
    /// Keys written into session state when the event is appended.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub state_delta: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_to_agent: Option<String>,
    /// The turn ended abnormally and the caller should surface `error`.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub escalate: bool,
}

/// One entry in a session's history.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Event {
    pub id: String,
    pub invocation_id: String,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    pub actions: EventActions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(invocation_id: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            invocation_id: invocation_id.into(),
            author: author.into(),
            content: None,
            actions: EventActions::default(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.content = Some(content);
        self
    }

    /// Final events end the turn: they carry neither function calls nor
    /// function responses, or they report an error.
    pub fn is_final_response(&self) -> bool {
        if self.actions.escalate || self.error.is_some() {
            return true;
        }
        match &self.content {
            Some(content) => {
                content.function_calls().is_empty()
                    && content.function_responses().is_empty()
                    && self.actions.transfer_to_agent.is_none()
            }
            None => false,
        }
    }

    pub fn text(&self) -> Option<String> {
        self.content.as_ref().and_then(Content::text)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Session {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    pub state: Map<String, Value>,
    pub events: Vec<Event>,
    pub last_update_time: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session `{session_id}` already exists for {app_name}/{user_id}")]
    AlreadyExists { app_name: String, user_id: String, session_id: String },
    #[error("session `{session_id}` not found for {app_name}/{user_id}")]
    NotFound { app_name: String, user_id: String, session_id: String },
}

impl Classified for SessionError {
    fn error_class(&self) -> ErrorClass {
        ErrorClass::Internal
    }
}

type SessionKey = (String, String, String);

fn key(app_name: &str, user_id: &str, session_id: &str) -> SessionKey {
    (app_name.to_string(), user_id.to_string(), session_id.to_string())
}

/// Process-local session store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemorySessionService {
    sessions: RwLock<HashMap<SessionKey, Session>>,
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session, generating an id when none is given.
    pub async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<&str>,
        state: Map<String, Value>,
    ) -> Result<Session, SessionError> {
        let session_id = session_id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut sessions = self.sessions.write().await;

        let key = key(app_name, user_id, &session_id);
        if sessions.contains_key(&key) {
            return Err(SessionError::AlreadyExists {
                app_name: app_name.to_string(),
                user_id: user_id.to_string(),
                session_id,
            });
        }

        let session = Session {
            id: session_id,
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            state,
            events: Vec::new(),
            last_update_time: Utc::now(),
        };
        sessions.insert(key, session.clone());
        Ok(session)
    }

    /// Snapshot of the session.
    pub async fn get_session(&self, app_name: &str, user_id: &str, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(&key(app_name, user_id, session_id)).cloned()
    }

    pub async fn list_sessions(&self, app_name: &str, user_id: &str) -> Vec<String> {
        let sessions = self.sessions.read().await;
        let mut ids: Vec<String> = sessions
            .values()
            .filter(|session| session.app_name == app_name && session.user_id == user_id)
            .map(|session| session.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn delete_session(&self, app_name: &str, user_id: &str, session_id: &str) -> bool {
        self.sessions.write().await.remove(&key(app_name, user_id, session_id)).is_some()
    }

    /// Appends the event and applies its state delta.
    pub async fn append_event(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
        event: Event,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&key(app_name, user_id, session_id)).ok_or_else(|| {
            SessionError::NotFound {
                app_name: app_name.to_string(),
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
            }
        })?;

        for (state_key, value) in &event.actions.state_delta {
            session.state.insert(state_key.clone(), value.clone());
        }
        session.last_update_time = event.timestamp;
        session.events.push(event);
        Ok(())
    }
}
