use thiserror::Error;

/// Convenience alias for `Result`s returning [`OrchestrationError`].
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Error taxonomy for the delegation/orchestration/consensus core.
///
/// Variants are grouped by the kind of failure (validation, dispatch,
/// execution, infrastructure) rather than by the component that raised them,
/// matching the error-handling design in the specification.
#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("bad state transition on task {task_id}: {message}")]
    BadStateTransition { task_id: String, message: String },

    #[error("duplicate agent registration: {0}")]
    DuplicateAgent(String),

    #[error("task queue is full (max: {0})")]
    QueueFull(usize),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("consensus error: {0}")]
    Consensus(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OrchestrationError {
    /// Maps a dispatch/execution-time failure to the wire error code used by
    /// `TaskDelegationService::mark_execution_result` and stored on the task
    /// record as `lastErrorCode`. These codes are part of the external
    /// contract (spec §6/§7), not an implementation detail, so they're kept
    /// as plain strings rather than another enum.
    pub fn as_task_error_code(&self) -> &'static str {
        match self {
            OrchestrationError::UnknownAgent(_) => "no_agent",
            OrchestrationError::InvalidMessage(_) => "send_failed",
            OrchestrationError::Consensus(_) => "consensus_failed",
            _ => "internal_error",
        }
    }
}
