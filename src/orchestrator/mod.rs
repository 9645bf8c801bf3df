//! Orchestrator (C6): drives dispatch waves over due tasks, wires the
//! registry/bus/delegation collaborators together, and resolves each
//! dispatched task's terminal outcome exactly once.
//!
//! Grounded on the reference's `agents/orchestrator/mod.rs` `AgentOrchestrator`
//! — same "listener task plus per-dispatch timeout, raced over a shared
//! pending map" shape — generalized from a fixed `AgentType` dispatch table
//! to capability-based discovery over [`AgentRegistry`]. Shared mutable
//! state (the pending map, rolling metrics, cumulative counters) lives in
//! `Shared` so the background listener task and the foreground dispatch
//! loop see the same world without the orchestrator itself needing to be
//! `'static`.

mod metrics;
mod pending;

use crate::bus::{CommunicationBus, SendParams, SessionParams};
use crate::capability;
use crate::config::Config;
use crate::delegation::TaskDelegationService;
use crate::ids::Clock;
use crate::models::{
    AgentExecutionResult, AgentExecutionStatus, MessageType, SessionMode, Task, TaskStatus,
};
use crate::registry::AgentRegistry;
pub use metrics::{MetricsSnapshot, PlanCounters};
use pending::{PendingMap, PlanProgress};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Parameters for [`Orchestrator::execute_plan`]. An explicit `session_id`
/// reuses an existing collaborative session (e.g. one the consensus engine
/// already created); omitting it opens a fresh broadcast session per call.
#[derive(Debug, Clone, Default)]
pub struct ExecutePlanParams {
    pub session_id: Option<String>,
    pub limit: Option<usize>,
}

/// A task that reached `failed` during this `executePlan` call.
#[derive(Debug, Clone)]
pub struct FailedTask {
    pub task_id: String,
    pub error_code: Option<String>,
}

/// Result of one `executePlan` call. `dispatched` lists every task sent
/// this wave; `completed`/`failed` list the terminal transitions observed
/// during the same wave, a subset of `dispatched` when resolved
/// synchronously — a task dispatched and resolved in one wave appears in
/// both `dispatched` and whichever of `completed`/`failed` matches its
/// outcome (spec §4.4's own example: `{dispatched:[T], completed:[T],
/// failed:[]}`). A task that didn't reach a terminal state this wave
/// (still queued for retry, or left mid-flight) appears only in
/// `dispatched`, or in neither list if it was never dispatched at all.
#[derive(Debug, Clone, Default)]
pub struct PlanResult {
    pub dispatched: Vec<String>,
    pub completed: Vec<String>,
    pub failed: Vec<FailedTask>,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
}

/// State shared between the foreground dispatch loop and the background
/// bus listener / timeout tasks.
struct Shared {
    bus: Arc<CommunicationBus>,
    delegation: Arc<TaskDelegationService>,
    clock: Arc<dyn Clock>,
    pending: PendingMap,
    metrics: Mutex<metrics::MetricsWindow>,
    metrics_session_id: Mutex<Option<String>>,
    counters: Counters,
}

impl Shared {
    async fn record_and_broadcast(&self, task_id: &str, duration_ms: u64, progress: &PlanProgress) {
        let snapshot = {
            let mut metrics = self.metrics.lock().await;
            metrics.record(duration_ms);
            metrics.snapshot()
        };
        let metrics_session = self.metrics_session().await;
        // Spec §6 wire format: `{"type":"operation_metrics_snapshot",
        // "operation":"TaskDelegation.execute","snapshot":{...},"timestamp":...}`,
        // broadcast as a standard `update` message.
        let envelope = serde_json::json!({
            "type": "operation_metrics_snapshot",
            "operation": "TaskDelegation.execute",
            "snapshot": snapshot,
            "timestamp": self.clock.now_utc(),
        });
        let metrics_content = serde_json::to_string(&envelope).unwrap_or_default();
        let _ = self
            .bus
            .broadcast_message(SendParams {
                session_id: metrics_session,
                from_agent: "orchestrator".to_string(),
                to_agent: None,
                message_type: MessageType::Update,
                content: metrics_content,
                metadata: HashMap::new(),
            })
            .await;

        let (dispatched, completed, failed) = progress.snapshot();
        let progress_content = format!(
            "{{\"type\":\"mission_progress\",\"taskId\":\"{task_id}\",\"dispatched\":{dispatched},\"completed\":{completed},\"failed\":{failed}}}"
        );
        let _ = self
            .bus
            .broadcast_message(SendParams {
                session_id: progress.session_id.clone(),
                from_agent: "orchestrator".to_string(),
                to_agent: None,
                message_type: MessageType::Update,
                content: progress_content,
                metadata: HashMap::new(),
            })
            .await;
    }

    async fn metrics_session(&self) -> String {
        let mut slot = self.metrics_session_id.lock().await;
        if let Some(id) = slot.as_ref() {
            return id.clone();
        }
        let id = self
            .bus
            .create_session(SessionParams {
                participants: vec!["orchestrator".to_string()],
                mode: SessionMode::Broadcast,
                topic: "mission_progress".to_string(),
                consensus_enabled: false,
            })
            .await;
        *slot = Some(id.clone());
        id
    }
}

/// Drives dispatch waves, owns the bus listener, and resolves pending task
/// completions. One instance is meant to live for the process lifetime; the
/// listener task is spawned exactly once in [`Orchestrator::new`].
pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    config: Config,
    cancelled: Arc<AtomicBool>,
    shared: Arc<Shared>,
    _listener: tokio::task::JoinHandle<()>,
    requeue_scheduler: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        bus: Arc<CommunicationBus>,
        delegation: Arc<TaskDelegationService>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        let shared = Arc::new(Shared {
            bus,
            delegation,
            clock,
            pending: PendingMap::new(),
            metrics: Mutex::new(metrics::MetricsWindow::new(config.metrics_window_size)),
            metrics_session_id: Mutex::new(None),
            counters: Counters::default(),
        });
        let cancelled = Arc::new(AtomicBool::new(false));

        let listener = tokio::spawn(listen_for_results(shared.clone()));

        Orchestrator {
            registry,
            config,
            cancelled,
            shared,
            _listener: listener,
            requeue_scheduler: Mutex::new(None),
        }
    }

    /// Starts a background task that periodically calls
    /// `processDueRequeues` so retry-eligible tasks get surfaced even
    /// between `executePlan` calls (spec §4.4, §6
    /// `requeueSchedulerIntervalMs`). A configured interval under 1 000 ms
    /// disables the scheduler entirely. Idempotent: calling this while a
    /// scheduler is already running is a no-op.
    pub async fn start_requeue_scheduler(&self) {
        if self.config.requeue_scheduler_interval_ms < 1_000 {
            debug!("requeue scheduler disabled (interval < 1000ms)");
            return;
        }
        let mut slot = self.requeue_scheduler.lock().await;
        if slot.is_some() {
            return;
        }
        let shared = self.shared.clone();
        let interval_ms = self.config.requeue_scheduler_interval_ms;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(StdDuration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                let now = shared.clock.now_utc();
                let due = shared.delegation.process_due_requeues(now).await;
                if !due.is_empty() {
                    debug!(count = due.len(), "requeue scheduler found due tasks");
                }
            }
        });
        *slot = Some(handle);
    }

    /// Stops the background requeue scheduler if one is running. Idempotent.
    pub async fn stop_requeue_scheduler(&self) {
        if let Some(handle) = self.requeue_scheduler.lock().await.take() {
            handle.abort();
        }
    }

    /// Runs one dispatch wave to completion: requeue any due retries,
    /// dispatch every eligible task (gated on its dependencies), await each
    /// dispatched task's terminal transition (or its timeout), and derive
    /// the final result by re-reading task records (spec §4.4 steps 1-6).
    pub async fn execute_plan(&self, params: ExecutePlanParams) -> PlanResult {
        let session_id = match params.session_id {
            Some(id) => id,
            None => {
                self.shared
                    .bus
                    .create_session(SessionParams {
                        participants: vec!["orchestrator".to_string()],
                        mode: SessionMode::Broadcast,
                        topic: "task execution".to_string(),
                        consensus_enabled: false,
                    })
                    .await
            }
        };

        let now = self.shared.clock.now_utc();
        let _ = self.shared.delegation.process_due_requeues(now).await;

        let progress = PlanProgress::new(session_id.clone());
        let mut dispatched_ids = Vec::new();
        let mut failed_entries: Vec<FailedTask> = Vec::new();
        let mut awaits = Vec::new();

        let batch = self.shared.delegation.get_queued_tasks(params.limit).await;

        for task in batch {
            if self.cancelled.load(Ordering::SeqCst) {
                break;
            }

            if self.has_failed_dependency(&task).await {
                self.shared.delegation.mark_dependency_failure(&task.id).await;
                self.shared.counters.failed.fetch_add(1, Ordering::SeqCst);
                progress.record_failed();
                failed_entries.push(FailedTask {
                    task_id: task.id.clone(),
                    error_code: Some("dependency_failed".to_string()),
                });
                continue;
            }
            if self.has_unresolved_dependency(&task).await {
                // Dependency hasn't reached a terminal state yet this wave;
                // leave it queued for a later call (spec §4.4: strict gating).
                continue;
            }

            if !self.shared.delegation.mark_dispatched(&task.id).await {
                continue;
            }
            dispatched_ids.push(task.id.clone());
            self.shared.counters.dispatched.fetch_add(1, Ordering::SeqCst);
            progress.dispatched.fetch_add(1, Ordering::SeqCst);

            let capability = capability::classify(&task.action);
            let Some(agent) = self.registry.discover_one(capability).await else {
                self.shared.delegation.mark_no_agent_failure(&task.id).await;
                self.shared.counters.failed.fetch_add(1, Ordering::SeqCst);
                progress.record_failed();
                failed_entries.push(FailedTask {
                    task_id: task.id.clone(),
                    error_code: Some("no_agent".to_string()),
                });
                continue;
            };

            self.shared.delegation.assign_target_agent(&task.id, &agent.id).await;
            if let Err(e) = self.shared.bus.add_participant(&session_id, &agent.id).await {
                warn!(task_id = %task.id, error = %e, "failed to add agent as session participant");
            }

            let content = format!(
                "ACTION: {}\nSOURCE_FINDING: {}\nTASK_ID: {}",
                task.action, task.finding, task.id
            );
            let send_result = self
                .shared
                .bus
                .send_message(SendParams {
                    session_id: session_id.clone(),
                    from_agent: "orchestrator".to_string(),
                    to_agent: Some(agent.id.clone()),
                    message_type: MessageType::Action,
                    content,
                    metadata: HashMap::new(),
                })
                .await;

            if let Err(e) = send_result {
                self.shared
                    .delegation
                    .mark_dispatch_failure(&task.id, &e.to_string())
                    .await;
                self.shared.counters.retried.fetch_add(1, Ordering::SeqCst);
                progress.record_failed();
                failed_entries.push(FailedTask {
                    task_id: task.id.clone(),
                    error_code: Some("send_failed".to_string()),
                });
                continue;
            }

            let dispatch_start = self.shared.clock.now_utc();
            let rx = self
                .shared
                .pending
                .insert(task.id.clone(), dispatch_start, progress.clone())
                .await;

            if self.config.simulate_agent_execution {
                self.spawn_simulated_agent_reply(&session_id, &agent.id, &task.id);
            }

            let timeout_ms = self.config.task_execution_timeout_ms;
            let task_id = task.id.clone();
            let shared = self.shared.clone();
            awaits.push(tokio::spawn(async move {
                await_completion(task_id, rx, timeout_ms, shared).await
            }));
        }

        for handle in awaits {
            let _ = handle.await;
        }

        let mut completed = Vec::new();
        for task_id in &dispatched_ids {
            if let Some(task) = self.shared.delegation.get_task(task_id).await {
                match task.status {
                    TaskStatus::Completed => {
                        completed.push(task_id.clone());
                        self.shared.counters.completed.fetch_add(1, Ordering::SeqCst);
                    }
                    TaskStatus::Failed => {
                        failed_entries.push(FailedTask {
                            task_id: task_id.clone(),
                            error_code: task.last_error_code.clone(),
                        });
                        self.shared.counters.failed.fetch_add(1, Ordering::SeqCst);
                    }
                    _ => {
                        // Still queued for a future retry wave; omitted from
                        // both lists per the disjoint-lists contract.
                    }
                }
            }
        }

        info!(
            session_id = %session_id,
            dispatched = dispatched_ids.len(),
            completed = completed.len(),
            failed = failed_entries.len(),
            "execute_plan finished"
        );

        PlanResult {
            dispatched: dispatched_ids,
            completed,
            failed: failed_entries,
        }
    }

    /// `true` if any declared dependency has already failed terminally.
    async fn has_failed_dependency(&self, task: &Task) -> bool {
        for dep_id in &task.depends_on {
            if let Some(dep) = self.shared.delegation.get_task(dep_id).await {
                if dep.status == TaskStatus::Failed {
                    return true;
                }
            }
        }
        false
    }

    /// `true` if any declared dependency hasn't completed yet (and hasn't
    /// failed either — that case is handled by [`has_failed_dependency`]).
    async fn has_unresolved_dependency(&self, task: &Task) -> bool {
        for dep_id in &task.depends_on {
            match self.shared.delegation.get_task(dep_id).await {
                Some(dep) if dep.status == TaskStatus::Completed => continue,
                Some(_) => return true,
                None => continue,
            }
        }
        false
    }

    /// Test-mode helper (spec §6 `simulateAgentExecution`): posts a
    /// synthetic `AgentExecutionResult` back on the session shortly after
    /// dispatch, standing in for a real agent when none is wired up.
    fn spawn_simulated_agent_reply(&self, session_id: &str, agent_id: &str, task_id: &str) {
        let bus = self.shared.bus.clone();
        let clock = self.shared.clock.clone();
        let session_id = session_id.to_string();
        let agent_id = agent_id.to_string();
        let task_id = task_id.to_string();
        let delay_ms = self.config.simulated_agent_delay_ms;
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_millis(delay_ms)).await;
            let result = AgentExecutionResult {
                task_id: task_id.clone(),
                status: AgentExecutionStatus::Completed,
                agent_id: agent_id.clone(),
                error_code: None,
                error_message: None,
                timestamp: clock.now_utc(),
            };
            let Ok(content) = serde_json::to_string(&result) else {
                return;
            };
            let _ = bus
                .send_message(SendParams {
                    session_id,
                    from_agent: agent_id,
                    to_agent: Some("orchestrator".to_string()),
                    message_type: MessageType::Response,
                    content,
                    metadata: HashMap::new(),
                })
                .await;
        });
    }

    /// Cancels the current and any future plan: pending tasks are dropped
    /// (their dispatch-side awaits resolve on the closed channel rather
    /// than a result), subsequent dispatch loops stop immediately, and the
    /// background requeue scheduler is stopped so a cancelled orchestrator
    /// doesn't keep re-dispatching due tasks off a scheduler nobody stopped
    /// (spec §5 cancellation).
    pub async fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.shared.pending.cancel_all().await;
        self.stop_requeue_scheduler().await;
    }

    pub fn resume(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.shared.metrics.lock().await.snapshot()
    }

    pub fn plan_counters(&self) -> PlanCounters {
        PlanCounters {
            queued: 0,
            dispatched: self.shared.counters.dispatched.load(Ordering::SeqCst) as usize,
            completed: self.shared.counters.completed.load(Ordering::SeqCst) as usize,
            failed: self.shared.counters.failed.load(Ordering::SeqCst) as usize,
            retried: self.shared.counters.retried.load(Ordering::SeqCst) as usize,
        }
    }
}

/// Races `rx` against `timeout_ms`. On timeout, tries to claim the pending
/// entry; if the listener already claimed it concurrently this is a no-op —
/// exactly one of the two paths ever resolves a task's terminal transition
/// (spec §8 property 6).
async fn await_completion(
    task_id: String,
    rx: tokio::sync::oneshot::Receiver<()>,
    timeout_ms: u64,
    shared: Arc<Shared>,
) {
    let outcome = tokio::time::timeout(StdDuration::from_millis(timeout_ms), rx).await;
    if outcome.is_ok() {
        // Listener resolved it; nothing left to do here.
        return;
    }
    let Some(entry) = shared.pending.take(&task_id).await else {
        // Listener won the race between the timeout firing and us claiming it.
        return;
    };
    let elapsed_ms = shared
        .clock
        .now_utc()
        .signed_duration_since(entry.dispatch_start)
        .num_milliseconds()
        .max(0) as u64;
    shared
        .delegation
        .mark_execution_result(
            &task_id,
            false,
            Some("task_timeout"),
            Some("execution timed out"),
            Some(elapsed_ms),
        )
        .await;
    entry.progress.record_failed();
    warn!(task_id = %task_id, timeout_ms, "task execution timed out");
    shared.record_and_broadcast(&task_id, elapsed_ms, &entry.progress).await;
}

/// The bus listener (spawned once from [`Orchestrator::new`]): resolves the
/// first pending entry matching an incoming message's task id, preferring
/// the strict `AgentExecutionResult` JSON wire format and falling back to
/// free-text `TASK_ID:` / `TASK_COMPLETE` / `TASK_FAILED` markers for
/// agents that haven't adopted the structured contract yet (spec §9).
async fn listen_for_results(shared: Arc<Shared>) {
    let mut rx = shared.bus.subscribe();
    loop {
        let message = match rx.recv().await {
            Ok(m) => m,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "orchestrator listener lagged behind the bus event stream");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };

        let (task_id, success, code, error_message) = match parse_result(&message.content) {
            Some(parsed) => parsed,
            None => continue,
        };

        let Some(entry) = shared.pending.take(&task_id).await else {
            continue;
        };
        let elapsed_ms = message
            .timestamp
            .signed_duration_since(entry.dispatch_start)
            .num_milliseconds()
            .max(0) as u64;

        shared
            .delegation
            .mark_execution_result(&task_id, success, code.as_deref(), error_message.as_deref(), Some(elapsed_ms))
            .await;

        if success {
            entry.progress.record_completed();
        } else {
            entry.progress.record_failed();
        }
        debug!(task_id = %task_id, success, "resolved pending task from bus message");
        shared.record_and_broadcast(&task_id, elapsed_ms, &entry.progress).await;
        entry.resolve();
    }
}

/// Returns `(task_id, success, error_code, error_message)` on a match.
fn parse_result(content: &str) -> Option<(String, bool, Option<String>, Option<String>)> {
    if let Ok(result) = serde_json::from_str::<AgentExecutionResult>(content) {
        let success = result.status == AgentExecutionStatus::Completed;
        return Some((result.task_id, success, result.error_code, result.error_message));
    }

    // Legacy free-text fallback: `TASK_ID: <id>` plus a `TASK_COMPLETE` or
    // `TASK_FAILED` marker line.
    let task_id = content
        .lines()
        .find_map(|line| line.strip_prefix("TASK_ID:").map(|rest| rest.trim().to_string()))?;
    if content.contains("TASK_COMPLETE") {
        warn!(task_id = %task_id, "agent used deprecated free-text completion marker");
        Some((task_id, true, None, None))
    } else if content.contains("TASK_FAILED") {
        warn!(task_id = %task_id, "agent used deprecated free-text failure marker");
        Some((task_id, false, Some("agent_report_failure".to_string()), None))
    } else {
        None
    }
}
