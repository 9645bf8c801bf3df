//! Session table backing the communication bus, shaped after the
//! reference's `session::SessionStore` (`src/session/mod.rs`) — a directory
//! of correlation scopes keyed by id, mutable only through its own methods.

use crate::error::{OrchestrationError, Result};
use crate::ids::{new_id, Clock};
use crate::models::{Session, SessionMode};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Parameters accepted by [`SessionTable::create`].
#[derive(Debug, Clone)]
pub struct CreateSessionParams {
    pub participants: Vec<String>,
    pub mode: SessionMode,
    pub topic: String,
    pub consensus_enabled: bool,
}

pub(super) struct SessionTable {
    clock: Arc<dyn Clock>,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionTable {
    pub(super) fn new(clock: Arc<dyn Clock>) -> Self {
        SessionTable {
            clock,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub(super) async fn create(&self, params: CreateSessionParams) -> String {
        let id = new_id("session");
        let session = Session {
            id: id.clone(),
            participants: params.participants,
            mode: params.mode,
            topic: params.topic,
            consensus_enabled: params.consensus_enabled,
            created_at: self.clock.now_utc(),
        };
        self.sessions.write().await.insert(id.clone(), session);
        id
    }

    pub(super) async fn get(&self, id: &str) -> Result<Session> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestrationError::UnknownSession(id.to_string()))
    }

    /// Validates that `agent` participates in `session_id`, the check the
    /// bus applies to `fromAgent` and a non-broadcast `toAgent` before a
    /// send is accepted (spec §4.2: "unknown agent" fails with
    /// `InvalidMessage`).
    pub(super) async fn add_participant(&self, session_id: &str, agent: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| OrchestrationError::UnknownSession(session_id.to_string()))?;
        if !session.participants.iter().any(|p| p == agent) {
            session.participants.push(agent.to_string());
        }
        Ok(())
    }

    pub(super) async fn validate_participant(&self, session_id: &str, agent: &str) -> Result<()> {
        let session = self.get(session_id).await?;
        if session.participants.iter().any(|p| p == agent) {
            Ok(())
        } else {
            Err(OrchestrationError::InvalidMessage(format!(
                "agent {agent} is not a participant in session {session_id}"
            )))
        }
    }
}
