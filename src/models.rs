//! Core data model shared by the registry, bus, delegation service,
//! orchestrator, and consensus engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Unit of delegated work owned exclusively by the task delegation service.
///
/// Status transitions form the DAG `queued -> dispatched -> {completed |
/// failed}`, with `failed -> queued` permitted while `attempts < maxAttempts`
/// (see [`TaskStatus`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub action: String,
    pub finding: String,
    pub status: TaskStatus,
    pub target_agent: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_eligible_at: DateTime<Utc>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub snapshot_hash: String,
    pub depends_on: HashSet<String>,
}

impl Task {
    pub fn new(
        id: String,
        action: String,
        finding: String,
        snapshot_hash: String,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Task {
            id,
            action,
            finding,
            status: TaskStatus::Queued,
            target_agent: None,
            attempts: 0,
            max_attempts,
            next_eligible_at: now,
            last_error_code: None,
            last_error_message: None,
            duration_ms: None,
            created_at: now,
            updated_at: now,
            snapshot_hash,
            depends_on: HashSet::new(),
        }
    }

    pub fn with_depends_on(mut self, depends_on: HashSet<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Lifecycle state of a [`Task`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Dispatched,
    Completed,
    Failed,
}

/// Agent registry directory entry. Mutated only by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub capabilities: HashSet<String>,
    pub health: AgentHealth,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentHealth {
    Healthy,
    Degraded,
    Unreachable,
}

/// Correlation scope for a run of messages between the orchestrator and
/// one or more agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub participants: Vec<String>,
    pub mode: SessionMode,
    pub topic: String,
    pub consensus_enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Collaborative,
    Broadcast,
}

/// Sessioned, typed message carried by the communication bus. Immutable
/// once sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub from_agent: String,
    /// `None` means broadcast to every session participant.
    pub to_agent: Option<String>,
    pub message_type: MessageType,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Action,
    Update,
    Query,
    Response,
    Notification,
}

/// Structured payload validated strictly by the orchestrator's bus
/// listener before it is allowed to resolve a pending task. Wire format is
/// camelCase (spec §6: `{"taskId":...,"status":...,"agentId":...}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentExecutionResult {
    pub task_id: String,
    pub status: AgentExecutionStatus,
    pub agent_id: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentExecutionStatus {
    Completed,
    Failed,
}

/// Transient ordered set of tasks to dispatch for one orchestrator run.
#[derive(Debug, Clone)]
pub struct Plan {
    pub tasks: Vec<Task>,
}

/// Opaque-except-for-hotspots snapshot handed to the delegation service's
/// harvest step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveSnapshot {
    pub taken_at: DateTime<Utc>,
    pub recent_error_events: Vec<String>,
    pub error_budget_burn_hot: Vec<ErrorBudgetBurn>,
    pub memory_backend_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBudgetBurn {
    pub operation: String,
    pub burn_rate: f64,
}

/// User feedback on a completed task, consumed by the memory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub task_id: String,
    pub user_rating: UserRating,
    pub correction: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRating {
    Good,
    Neutral,
    Bad,
}

/// Consensus engine input: one agent's position on a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewPoint {
    pub agent_id: String,
    pub position: String,
    pub confidence: f64,
}

/// Consensus engine output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub agreed: bool,
    pub consensus_level: f64,
    pub supporting_agents: Vec<String>,
    pub objecting_agents: Vec<String>,
    pub neutral_agents: Vec<String>,
    pub final_decision: String,
    pub compromises_reached: Vec<String>,
    pub quality_score: f64,
    pub constitutionally_validated: bool,
}
