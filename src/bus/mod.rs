//! Communication bus (C4): typed, sessioned message transport between the
//! orchestrator and agents.
//!
//! Grounded on the reference's `session::SessionStore` for the session-table
//! shape (see `session.rs`) and `agents/orchestrator/mod.rs`'s
//! `mpsc::unbounded_channel` result-broadcast wiring, switched here to
//! `tokio::sync::broadcast` to get the "late subscribers may miss" semantics
//! spec §4.2 calls for — a late subscriber simply isn't in the receiver set
//! when an earlier message was sent, rather than replaying history to it.

mod session;

use crate::error::{OrchestrationError, Result};
use crate::ids::Clock;
use crate::models::{Message, MessageType, SessionMode};
use session::{CreateSessionParams, SessionTable};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::debug;

pub use session::CreateSessionParams as SessionParams;

/// Parameters for [`CommunicationBus::send_message`] and
/// [`CommunicationBus::broadcast_message`] (the latter ignores `to_agent`).
#[derive(Debug, Clone)]
pub struct SendParams {
    pub session_id: String,
    pub from_agent: String,
    pub to_agent: Option<String>,
    pub message_type: MessageType,
    pub content: String,
    pub metadata: HashMap<String, String>,
}

struct SessionChannel {
    history: VecDeque<Message>,
    next_seq: u64,
}

/// Typed, sessioned message bus. Sends are serialized per session (FIFO
/// ordering within a session); sends on different sessions may interleave
/// freely since each session owns its own history mutex (spec §4.2, §5).
pub struct CommunicationBus {
    clock: Arc<dyn Clock>,
    sessions: SessionTable,
    channels: RwLock<HashMap<String, Mutex<SessionChannel>>>,
    history_cap: usize,
    events: broadcast::Sender<Message>,
}

impl CommunicationBus {
    pub fn new(clock: Arc<dyn Clock>, history_cap: usize) -> Self {
        let (events, _rx) = broadcast::channel(4096);
        CommunicationBus {
            clock: clock.clone(),
            sessions: SessionTable::new(clock),
            channels: RwLock::new(HashMap::new()),
            history_cap,
            events,
        }
    }

    pub async fn create_session(&self, params: SessionParams) -> String {
        let id = self.sessions.create(params).await;
        self.channels.write().await.insert(
            id.clone(),
            Mutex::new(SessionChannel {
                history: VecDeque::new(),
                next_seq: 0,
            }),
        );
        id
    }

    /// Subscribes to the `message_sent` event stream. Only messages accepted
    /// *after* this call are delivered to this receiver — a deliberate
    /// "late subscribers may miss" gap rather than a replay guarantee.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.events.subscribe()
    }

    pub async fn send_message(&self, params: SendParams) -> Result<String> {
        let to_agent = params.to_agent.clone();
        self.accept(params, to_agent).await
    }

    pub async fn broadcast_message(&self, mut params: SendParams) -> Result<String> {
        params.to_agent = None;
        self.accept(params, None).await
    }

    async fn accept(&self, params: SendParams, to_agent: Option<String>) -> Result<String> {
        self.sessions
            .validate_participant(&params.session_id, &params.from_agent)
            .await?;
        if let Some(ref to) = to_agent {
            self.sessions
                .validate_participant(&params.session_id, to)
                .await?;
        }

        let channels = self.channels.read().await;
        let channel_lock = channels
            .get(&params.session_id)
            .ok_or_else(|| OrchestrationError::UnknownSession(params.session_id.clone()))?;
        let mut channel = channel_lock.lock().await;

        channel.next_seq += 1;
        let message = Message {
            id: format!("msg-{}-{:020}", params.session_id, channel.next_seq),
            session_id: params.session_id.clone(),
            from_agent: params.from_agent,
            to_agent,
            message_type: params.message_type,
            content: params.content,
            timestamp: self.clock.now_utc(),
            metadata: params.metadata,
        };

        channel.history.push_back(message.clone());
        while channel.history.len() > self.history_cap {
            channel.history.pop_front();
        }
        drop(channel);
        drop(channels);

        debug!(session_id = %message.session_id, message_id = %message.id, "message accepted");
        // A full broadcast channel with no subscribers is a legitimate state
        // (no one is listening yet); only a send error from a full channel
        // buffer with active subscribers is worth surfacing, and even then
        // only as a log — dropping from the event stream never un-persists
        // a message already recorded in history.
        let _ = self.events.send(message.clone());

        Ok(message.id)
    }

    pub async fn get_message_history(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        let channels = self.channels.read().await;
        let channel_lock = channels
            .get(session_id)
            .ok_or_else(|| OrchestrationError::UnknownSession(session_id.to_string()))?;
        let channel = channel_lock.lock().await;
        let limit = if limit == 0 { channel.history.len() } else { limit };
        Ok(channel.history.iter().rev().take(limit).cloned().collect())
    }

    pub async fn default_agent_session(&self, topic: &str) -> String {
        self.create_session(CreateSessionParams {
            participants: Vec::new(),
            mode: SessionMode::Broadcast,
            topic: topic.to_string(),
            consensus_enabled: false,
        })
        .await
    }

    /// Allows new participants to join a session after creation (e.g. when
    /// the orchestrator discovers an agent mid-plan). Spec §3 treats
    /// `participants` as mutable session state, not an immutable snapshot.
    pub async fn add_participant(&self, session_id: &str, agent_id: &str) -> Result<()> {
        self.sessions.add_participant(session_id, agent_id).await
    }
}
