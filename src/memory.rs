//! Memory store contract (consumed) and the ambient in-memory default
//! implementation, plus the background audit writer used by the task
//! delegation service.
//!
//! Records are opaque to the store; retrieval is by tag. Memory failures are
//! non-fatal for state transitions — callers log and move on rather than
//! propagate, mirroring the reference's in-memory session/result stores.

use crate::error::Result;
use crate::ids::{new_id, Clock};
use crate::models::{FeedbackRecord, UserRating};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub id: String,
    pub content: Value,
    pub tags: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub query: Option<String>,
    pub tags: Option<Vec<String>>,
    pub limit: usize,
}

/// Contract consumed by the rest of the core. Implementations may be backed
/// by any storage engine; the core only relies on tag-based retrieval.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn add_record(&self, content: Value, tags: Vec<String>) -> Result<String>;
    async fn search(&self, query: MemoryQuery) -> Result<Vec<MemoryRecord>>;
}

/// Default standalone implementation: an append-only `Vec` guarded by a
/// `Mutex`, matching the reference's in-memory session/result stores.
pub struct InMemoryMemoryStore {
    clock: Arc<dyn Clock>,
    records: Mutex<Vec<MemoryRecord>>,
}

impl InMemoryMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        InMemoryMemoryStore {
            clock,
            records: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn add_record(&self, content: Value, tags: Vec<String>) -> Result<String> {
        let id = new_id("rec");
        let record = MemoryRecord {
            id: id.clone(),
            content,
            tags,
            created_at: self.clock.now_utc(),
        };
        self.records.lock().await.push(record);
        Ok(id)
    }

    async fn search(&self, query: MemoryQuery) -> Result<Vec<MemoryRecord>> {
        let records = self.records.lock().await;
        let matches = records.iter().rev().filter(|record| {
            let tags_match = query
                .tags
                .as_ref()
                .map(|wanted| wanted.iter().all(|t| record.tags.contains(t)))
                .unwrap_or(true);
            let query_match = query
                .query
                .as_ref()
                .map(|q| record.content.to_string().to_lowercase().contains(&q.to_lowercase()))
                .unwrap_or(true);
            tags_match && query_match
        });
        let limit = if query.limit == 0 { usize::MAX } else { query.limit };
        Ok(matches.take(limit).cloned().collect())
    }
}

/// Fire-and-forget audit writer so a slow memory backend never stalls a
/// task-state transition. Matches the reference's `tokio::spawn` background
/// loop idiom, applied here to a single best-effort write per call.
#[derive(Clone)]
pub struct BackgroundAuditWriter {
    store: Arc<dyn MemoryStore>,
}

impl BackgroundAuditWriter {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        BackgroundAuditWriter { store }
    }

    /// Spawns the write and returns immediately; failures are logged, never
    /// propagated, and never revert the state transition that triggered them.
    pub fn write(&self, content: Value, tags: Vec<String>) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(err) = store.add_record(content, tags).await {
                tracing::warn!(error = %err, "audit write failed");
            }
        });
    }
}

/// Convenience constructor for an audit record describing a task-state
/// transition, with the tag shape `{task, <new-status>, taskId, snapshotHash}`
/// the delegation service's auditing section names.
pub fn task_transition_record(
    task_id: &str,
    new_status: &str,
    snapshot_hash: &str,
) -> (Value, Vec<String>) {
    let content = serde_json::json!({
        "taskId": task_id,
        "newStatus": new_status,
        "snapshotHash": snapshot_hash,
    });
    let tags = vec![
        "task".to_string(),
        new_status.to_string(),
        task_id.to_string(),
        snapshot_hash.to_string(),
    ];
    (content, tags)
}

/// Feedback service (C9): persists one user rating per completed task via
/// the memory store contract. Thin by design — spec §2 names it only as
/// "persists user rating per completed task via C2", with no lifecycle of
/// its own beyond that single write-path.
pub struct FeedbackService {
    store: Arc<dyn MemoryStore>,
}

impl FeedbackService {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        FeedbackService { store }
    }

    /// Records a [`FeedbackRecord`] tagged `{feedback, taskId, rating}` so it
    /// can be retrieved by either dimension later. Propagates the memory
    /// store's error rather than swallowing it — unlike the best-effort
    /// audit trail, feedback submission is itself the caller's request, so a
    /// failure here must be visible to whoever is submitting the rating.
    pub async fn record(&self, feedback: &FeedbackRecord) -> Result<String> {
        let content = serde_json::json!({
            "taskId": feedback.task_id,
            "userRating": feedback.user_rating,
            "correction": feedback.correction,
            "timestamp": feedback.timestamp,
        });
        let tags = vec![
            "feedback".to_string(),
            feedback.task_id.clone(),
            rating_tag(feedback.user_rating).to_string(),
        ];
        self.store.add_record(content, tags).await
    }

    /// All feedback recorded for a given task, most-recent-first.
    pub async fn for_task(&self, task_id: &str) -> Result<Vec<MemoryRecord>> {
        self.store
            .search(MemoryQuery {
                query: None,
                tags: Some(vec!["feedback".to_string(), task_id.to_string()]),
                limit: 0,
            })
            .await
    }
}

fn rating_tag(rating: UserRating) -> &'static str {
    match rating {
        UserRating::Good => "good",
        UserRating::Neutral => "neutral",
        UserRating::Bad => "bad",
    }
}
