//! Default tunables for the delegation/orchestration core. Each has a
//! matching `Config` field that can override it at runtime (see
//! `src/config/mod.rs`).

/// Delegation queue poll interval for the background requeue scheduler.
pub const TASK_POLL_INTERVAL_MS: u64 = 100;

/// Backpressure cap on the delegation queue.
pub const MAX_QUEUE_SIZE: usize = 1000;

/// Retry ceiling applied to a task when none is set explicitly.
pub const DEFAULT_TASK_MAX_ATTEMPTS: u32 = 3;

/// Per-task await ceiling in the orchestrator (`T_exec`).
pub const DEFAULT_TASK_EXECUTION_TIMEOUT_MS: u64 = 4_000;

/// Exponential backoff base, in milliseconds.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;

/// Exponential backoff cap, in milliseconds.
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;

/// Background requeue scan period; values below 1000ms disable the scheduler.
pub const DEFAULT_REQUEUE_SCHEDULER_INTERVAL_MS: u64 = 0;

/// Delay used by the orchestrator's simulated-agent test mode.
pub const DEFAULT_SIMULATED_AGENT_DELAY_MS: u64 = 120;

/// Minimum fraction of supporting viewpoints for consensus acceptance.
pub const DEFAULT_CONSENSUS_AGREEMENT_THRESHOLD: f64 = 0.7;

/// Per-session message history retention cap (oldest-first eviction).
pub const DEFAULT_MESSAGE_HISTORY_CAP: usize = 10_000;

/// Rolling sample cap feeding the orchestrator's avg/p95/p99 metrics.
pub const DEFAULT_METRICS_WINDOW_SIZE: usize = 1_000;

/// Similarity threshold above which a viewpoint is considered supportive.
pub const SUPPORT_SIMILARITY_THRESHOLD: f64 = 0.6;

/// Similarity threshold below which an objecting viewpoint is counted as such.
pub const OBJECTION_SIMILARITY_THRESHOLD: f64 = 0.4;

/// Minimum word length counted toward "common ground" in compromise synthesis.
pub const COMMON_GROUND_MIN_WORD_LEN: usize = 3;

/// Whether the consensus engine may delegate compromise synthesis to a
/// `ModelProvider` when one is supplied; disabled by default since the
/// deterministic algorithm alone satisfies the contract.
pub const DEFAULT_CONSENSUS_LLM_SYNTHESIS_ENABLED: bool = false;
