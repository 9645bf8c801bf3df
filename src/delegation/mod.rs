//! Task delegation service (C5): owns task records, the state machine,
//! retry/backoff policy, and harvest-from-snapshot deduplication.
//!
//! Grounded on the reference's `agents/orchestrator/{task_queue,
//! result_store, status_manager, atomic_state}.rs` quartet, merged into the
//! single contract spec §4.3 names. The teacher split task storage, result
//! storage, status bookkeeping, and atomic transitions into four
//! collaborating services guarded by separate locks acquired in a fixed
//! order; this service keeps that "one critical section per transition"
//! discipline but folds the four into one `Mutex<HashMap<String, Task>>`
//! since every field here belongs to the same [`Task`] record.

pub(crate) mod backoff;

use crate::config::Config;
use crate::ids::{new_id, Clock};
use crate::memory::{task_transition_record, BackgroundAuditWriter};
use crate::models::{ProactiveSnapshot, Task, TaskStatus};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// One recommendation from the external deep-analysis step (C8) that
/// `harvest_and_queue` turns into a [`Task`].
#[derive(Debug, Clone)]
pub struct Recommendation {
    pub action: String,
    pub finding: String,
    pub depends_on: HashSet<String>,
}

impl Recommendation {
    pub fn new(action: impl Into<String>, finding: impl Into<String>) -> Self {
        Recommendation {
            action: action.into(),
            finding: finding.into(),
            depends_on: HashSet::new(),
        }
    }
}

/// Optional filter for [`TaskDelegationService::get_all_tasks`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
}

pub struct TaskDelegationService {
    clock: Arc<dyn Clock>,
    audit: BackgroundAuditWriter,
    tasks: Mutex<HashMap<String, Task>>,
    default_max_attempts: u32,
    backoff_base_ms: u64,
    backoff_cap_ms: u64,
}

impl TaskDelegationService {
    pub fn new(clock: Arc<dyn Clock>, audit: BackgroundAuditWriter, config: &Config) -> Self {
        TaskDelegationService {
            clock,
            audit,
            tasks: Mutex::new(HashMap::new()),
            default_max_attempts: config.task_max_attempts,
            backoff_base_ms: config.backoff_base_ms,
            backoff_cap_ms: config.backoff_cap_ms,
        }
    }

    /// Derives one task per recommendation. Deduplicates against any
    /// non-terminal task sharing the same `(snapshotHash, action)` pair
    /// (spec §4.3, §9 open question: `snapshotHash` is the hash of
    /// `takenAt` plus the normalized action text, not the whole snapshot).
    pub async fn harvest_and_queue(
        &self,
        snapshot: &ProactiveSnapshot,
        recommendations: &[Recommendation],
    ) -> Vec<String> {
        let now = self.clock.now_utc();
        let mut tasks = self.tasks.lock().await;
        let mut created = Vec::new();

        for rec in recommendations {
            let snapshot_hash = snapshot_hash(snapshot.taken_at, &rec.action);
            let duplicate = tasks.values().any(|task| {
                task.snapshot_hash == snapshot_hash && task.action == rec.action && !task.is_terminal()
            });
            if duplicate {
                continue;
            }

            let id = new_id("task");
            let task = Task::new(
                id.clone(),
                rec.action.clone(),
                rec.finding.clone(),
                snapshot_hash.clone(),
                self.default_max_attempts,
                now,
            )
            .with_depends_on(rec.depends_on.clone());

            self.audit_transition(&id, "queued", &snapshot_hash);
            tasks.insert(id.clone(), task);
            created.push(id);
        }

        if !created.is_empty() {
            info!(count = created.len(), "harvested tasks from proactive snapshot");
        }
        created
    }

    /// Tasks eligible for dispatch right now, sorted by `nextEligibleAt`
    /// ascending then `createdAt` ascending (spec §4.3 "Ordering").
    pub async fn get_queued_tasks(&self, limit: Option<usize>) -> Vec<Task> {
        let now = self.clock.now_utc();
        let tasks = self.tasks.lock().await;
        let mut eligible: Vec<Task> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Queued && t.next_eligible_at <= now)
            .cloned()
            .collect();
        eligible.sort_by(|a, b| {
            a.next_eligible_at
                .cmp(&b.next_eligible_at)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        if let Some(limit) = limit {
            eligible.truncate(limit);
        }
        eligible
    }

    pub async fn get_all_tasks(&self, filter: TaskFilter) -> Vec<Task> {
        let tasks = self.tasks.lock().await;
        tasks
            .values()
            .filter(|t| filter.status.map(|s| s == t.status).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.tasks.lock().await.get(task_id).cloned()
    }

    /// `queued -> dispatched`. No-op (returns `false`) if the task isn't
    /// `queued` — the caller drops the task rather than treating this as an
    /// error, per spec §4.3. `targetAgent` isn't known yet at this point in
    /// the orchestrator's algorithm (capability discovery happens after);
    /// see [`assign_target_agent`](Self::assign_target_agent).
    pub async fn mark_dispatched(&self, task_id: &str) -> bool {
        let now = self.clock.now_utc();
        let mut tasks = self.tasks.lock().await;
        let Some(task) = tasks.get_mut(task_id) else {
            return false;
        };
        if task.status != TaskStatus::Queued {
            return false;
        }
        task.status = TaskStatus::Dispatched;
        task.updated_at = now;
        let snapshot_hash = task.snapshot_hash.clone();
        drop(tasks);
        self.audit_transition(task_id, "dispatched", &snapshot_hash);
        true
    }

    /// Records which agent a dispatched task was handed to, once the
    /// orchestrator's capability discovery step has picked one.
    pub async fn assign_target_agent(&self, task_id: &str, agent_id: &str) {
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.get_mut(task_id) {
            task.target_agent = Some(agent_id.to_string());
        }
    }

    /// `send_failed`: the one dispatch error spec §7 marks retried like any
    /// execution failure. Shares the same attempts/backoff/terminal core as
    /// [`mark_execution_result`]'s failure branch (this crate's resolution
    /// to §4.3 and §7 describing the same underlying transition from two
    /// angles: see `DESIGN.md`).
    ///
    /// [`mark_execution_result`]: Self::mark_execution_result
    pub async fn mark_dispatch_failure(&self, task_id: &str, message: &str) -> bool {
        self.transition_failure(task_id, TaskStatus::Dispatched, "send_failed", message, None, true)
            .await
    }

    /// No capable agent was found for a dispatched task. Spec §7 counts
    /// `no_agent` among the dispatch errors that are terminal "unless
    /// covered by retry policy (only `send_failed` is retried)" — so this
    /// always fails the task outright, regardless of remaining attempts.
    pub async fn mark_no_agent_failure(&self, task_id: &str) -> bool {
        self.transition_failure(
            task_id,
            TaskStatus::Dispatched,
            "no_agent",
            "no capability-matching agent is registered",
            None,
            false,
        )
        .await
    }

    /// A failed dependency fails the dependent task directly, without ever
    /// dispatching it (spec §4.4, §9 open question: strict enforcement).
    /// This is the one case where a task goes `queued -> failed` without
    /// passing through `dispatched`, and like `no_agent` it is never
    /// retried.
    pub async fn mark_dependency_failure(&self, task_id: &str) -> bool {
        self.transition_failure(
            task_id,
            TaskStatus::Queued,
            "dependency_failed",
            "a dependency failed",
            None,
            false,
        )
        .await
    }

    /// `dispatched -> completed` or `dispatched -> {failed | queued(retry)}`.
    /// Idempotent on terminal states: a second call for an already-terminal
    /// task is a no-op returning `false` (spec §8 property 5).
    pub async fn mark_execution_result(
        &self,
        task_id: &str,
        success: bool,
        code: Option<&str>,
        message: Option<&str>,
        duration_ms: Option<u64>,
    ) -> bool {
        if success {
            let now = self.clock.now_utc();
            let mut tasks = self.tasks.lock().await;
            let Some(task) = tasks.get_mut(task_id) else {
                return false;
            };
            if task.status != TaskStatus::Dispatched {
                return false;
            }
            task.status = TaskStatus::Completed;
            if task.duration_ms.is_none() {
                task.duration_ms = duration_ms;
            }
            task.updated_at = now;
            let snapshot_hash = task.snapshot_hash.clone();
            drop(tasks);
            self.audit_transition(task_id, "completed", &snapshot_hash);
            true
        } else {
            // task_timeout and agent_report_failure are both retried up to
            // maxAttempts (spec §7: "Execution errors ... subject to retry
            // until maxAttempts").
            self.transition_failure(
                task_id,
                TaskStatus::Dispatched,
                code.unwrap_or("agent_report_failure"),
                message.unwrap_or(""),
                duration_ms,
                true,
            )
            .await
        }
    }

    /// Shared `{dispatched | queued} -> {failed | queued}` core for dispatch
    /// failures, failed execution results, and dependency failures. Only
    /// fires if the task is currently in `expected_status`. When `retryable`
    /// is `false` the task always goes straight to `failed`, regardless of
    /// remaining attempts (spec §7: `no_agent` and `dependency_failed` are
    /// never retried).
    async fn transition_failure(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
        code: &str,
        message: &str,
        duration_ms: Option<u64>,
        retryable: bool,
    ) -> bool {
        let now = self.clock.now_utc();
        let mut tasks = self.tasks.lock().await;
        let Some(task) = tasks.get_mut(task_id) else {
            return false;
        };
        if task.status != expected_status {
            return false;
        }

        task.attempts += 1;
        task.last_error_code = Some(code.to_string());
        task.last_error_message = Some(message.to_string());
        task.updated_at = now;
        if duration_ms.is_some() && task.duration_ms.is_none() {
            task.duration_ms = duration_ms;
        }

        let snapshot_hash = task.snapshot_hash.clone();
        let new_status = if !retryable || task.attempts >= task.max_attempts {
            task.status = TaskStatus::Failed;
            "failed"
        } else {
            let jitter = backoff::random_jitter();
            let delay_ms =
                backoff::backoff_ms(self.backoff_base_ms, self.backoff_cap_ms, task.attempts, jitter);
            task.status = TaskStatus::Queued;
            task.next_eligible_at = now + chrono::Duration::milliseconds(delay_ms as i64);
            "queued"
        };
        drop(tasks);

        if new_status == "failed" {
            warn!(task_id = %task_id, code = %code, "task failed terminally");
        }
        self.audit_transition(task_id, new_status, &snapshot_hash);
        true
    }

    /// Scans `queued` tasks whose `nextEligibleAt <= now`. Does not mutate
    /// state; the scheduler decides what to do with the returned ids (spec
    /// §4.3: "it does not itself change state").
    pub async fn process_due_requeues(&self, now: DateTime<Utc>) -> Vec<String> {
        let tasks = self.tasks.lock().await;
        tasks
            .values()
            .filter(|t| t.status == TaskStatus::Queued && t.next_eligible_at <= now)
            .map(|t| t.id.clone())
            .collect()
    }

    fn audit_transition(&self, task_id: &str, new_status: &str, snapshot_hash: &str) {
        let (content, tags) = task_transition_record(task_id, new_status, snapshot_hash);
        self.audit.write(content, tags);
    }
}

/// `sha256(takenAt_rfc3339 || " " || normalized_action)`, truncated to the
/// first 16 hex characters.
fn snapshot_hash(taken_at: DateTime<Utc>, action: &str) -> String {
    let normalized = normalize_action(action);
    let input = format!("{} {}", taken_at.to_rfc3339(), normalized);
    let digest = Sha256::digest(input.as_bytes());
    let hex = format!("{digest:x}");
    hex[..16].to_string()
}

fn normalize_action(action: &str) -> String {
    action.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SystemClock;
    use crate::memory::InMemoryMemoryStore;

    fn service() -> TaskDelegationService {
        let clock = Arc::new(SystemClock);
        let store = Arc::new(InMemoryMemoryStore::new(clock.clone()));
        let audit = BackgroundAuditWriter::new(store);
        let config = Config {
            backoff_base_ms: 10,
            backoff_cap_ms: 100,
            ..Config::default()
        };
        TaskDelegationService::new(clock, audit, &config)
    }

    fn snapshot() -> ProactiveSnapshot {
        ProactiveSnapshot {
            taken_at: Utc::now(),
            recent_error_events: vec![],
            error_budget_burn_hot: vec![],
            memory_backend_status: "ok".to_string(),
        }
    }

    #[tokio::test]
    async fn harvest_creates_one_task_per_recommendation() {
        let service = service();
        let snap = snapshot();
        let ids = service
            .harvest_and_queue(&snap, &[Recommendation::new("Refactor latency thresholds", "p99 spike")])
            .await;
        assert_eq!(ids.len(), 1);
        let task = service.get_task(&ids[0]).await.unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.attempts, 0);
    }

    #[tokio::test]
    async fn harvest_same_snapshot_twice_is_idempotent() {
        let service = service();
        let snap = snapshot();
        let recs = vec![Recommendation::new("Refactor latency thresholds", "p99 spike")];

        let first = service.harvest_and_queue(&snap, &recs).await;
        let second = service.harvest_and_queue(&snap, &recs).await;

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 0);
        assert_eq!(service.get_all_tasks(TaskFilter::default()).await.len(), 1);
    }

    #[tokio::test]
    async fn harvest_requeues_after_dedup_target_goes_terminal() {
        let service = service();
        let snap = snapshot();
        let recs = vec![Recommendation::new("Refactor latency thresholds", "p99 spike")];

        let first = service.harvest_and_queue(&snap, &recs).await;
        assert!(service.mark_dispatched(&first[0]).await);
        assert!(
            service
                .mark_execution_result(&first[0], true, None, None, Some(10))
                .await
        );

        let second = service.harvest_and_queue(&snap, &recs).await;
        assert_eq!(second.len(), 1, "a terminal task no longer blocks re-harvest");
    }

    #[tokio::test]
    async fn mark_dispatched_is_noop_when_not_queued() {
        let service = service();
        let ids = service
            .harvest_and_queue(&snapshot(), &[Recommendation::new("Document the API", "stale docs")])
            .await;
        assert!(service.mark_dispatched(&ids[0]).await);
        assert!(!service.mark_dispatched(&ids[0]).await);
    }

    #[tokio::test]
    async fn mark_execution_result_is_idempotent_on_terminal_tasks() {
        let service = service();
        let ids = service
            .harvest_and_queue(&snapshot(), &[Recommendation::new("Document the API", "stale docs")])
            .await;
        service.mark_dispatched(&ids[0]).await;
        assert!(
            service
                .mark_execution_result(&ids[0], true, None, None, Some(5))
                .await
        );
        assert!(
            !service
                .mark_execution_result(&ids[0], true, None, None, Some(999))
                .await
        );
        let task = service.get_task(&ids[0]).await.unwrap();
        assert_eq!(task.duration_ms, Some(5));
    }

    #[tokio::test]
    async fn failure_under_max_attempts_requeues_with_backoff() {
        let service = service();
        let ids = service
            .harvest_and_queue(&snapshot(), &[Recommendation::new("Document the API", "stale docs")])
            .await;
        service.mark_dispatched(&ids[0]).await;

        let before = Utc::now();
        assert!(
            service
                .mark_execution_result(&ids[0], false, Some("send_failed"), Some("boom"), None)
                .await
        );

        let task = service.get_task(&ids[0]).await.unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.attempts, 1);
        assert!(task.next_eligible_at >= before);
    }

    #[tokio::test]
    async fn failure_at_max_attempts_is_terminal() {
        let service = service();
        let ids = service
            .harvest_and_queue(&snapshot(), &[Recommendation::new("Document the API", "stale docs")])
            .await;

        for _ in 0..3 {
            service.mark_dispatched(&ids[0]).await;
            service
                .mark_execution_result(&ids[0], false, Some("send_failed"), Some("boom"), None)
                .await;
        }

        let task = service.get_task(&ids[0]).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempts, 3);

        assert!(!service.mark_dispatched(&ids[0]).await);
    }

    #[tokio::test]
    async fn process_due_requeues_does_not_mutate_state() {
        let service = service();
        let ids = service
            .harvest_and_queue(&snapshot(), &[Recommendation::new("Document the API", "stale docs")])
            .await;
        service.mark_dispatched(&ids[0]).await;
        service
            .mark_execution_result(&ids[0], false, Some("send_failed"), Some("boom"), None)
            .await;

        let task_before = service.get_task(&ids[0]).await.unwrap();
        let due = service.process_due_requeues(task_before.next_eligible_at).await;
        assert!(due.contains(&ids[0]));

        let task_after = service.get_task(&ids[0]).await.unwrap();
        assert_eq!(task_before.status, task_after.status);
        assert_eq!(task_before.next_eligible_at, task_after.next_eligible_at);
    }

    #[tokio::test]
    async fn queued_tasks_sorted_by_eligibility_then_creation() {
        let service = service();
        let snap = snapshot();
        let ids = service
            .harvest_and_queue(
                &snap,
                &[
                    Recommendation::new("Document the API", "stale docs"),
                    Recommendation::new("Analyze recent error spikes", "spike"),
                ],
            )
            .await;

        let queued = service.get_queued_tasks(None).await;
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].id, ids[0]);
        assert_eq!(queued[1].id, ids[1]);
    }
}
