//! The orchestrator's pending-completion map: "exactly one completion
//! signal per task, delivered to whichever side observes first" (spec §9).
//!
//! Generalizes the reference's `Arc<Mutex<HashMap<...>>>` pending-map idiom
//! (`agents/orchestrator/mod.rs`'s `task_storage`/`task_results` pair) to a
//! single `oneshot`-keyed map so a task's terminal transition — whether
//! observed by the bus listener or by the per-task timeout — removes the
//! entry exactly once (spec §8 property 6: the map is empty at the end of
//! `executePlan`).

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

/// Plan-scoped, atomically-updated progress counters, shared by every
/// pending entry belonging to the same `executePlan` call so the listener
/// (which only ever sees one task at a time) can still broadcast an
/// accurate `mission_progress` snapshot (spec §4.4).
#[derive(Debug)]
pub struct PlanProgress {
    pub session_id: String,
    pub dispatched: AtomicUsize,
    pub completed: AtomicUsize,
    pub failed: AtomicUsize,
}

impl PlanProgress {
    pub fn new(session_id: String) -> Arc<Self> {
        Arc::new(PlanProgress {
            session_id,
            dispatched: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        })
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> (usize, usize, usize) {
        (
            self.dispatched.load(Ordering::SeqCst),
            self.completed.load(Ordering::SeqCst),
            self.failed.load(Ordering::SeqCst),
        )
    }
}

pub struct PendingEntry {
    pub dispatch_start: DateTime<Utc>,
    pub progress: Arc<PlanProgress>,
    completion: oneshot::Sender<()>,
}

/// Keyed by `taskId`, mutated only from (a) the dispatch loop on insertion
/// and (b) the bus listener or timeout path on removal — the three code
/// paths spec §4.4's "Concurrency discipline" names. Serialized behind one
/// `Mutex` so removal is atomic: whichever side calls [`take`](Self::take)
/// first observes `Some`, the other observes `None`.
#[derive(Clone, Default)]
pub struct PendingMap {
    inner: Arc<Mutex<HashMap<String, PendingEntry>>>,
}

impl PendingMap {
    pub fn new() -> Self {
        PendingMap {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers a task as awaiting a terminal transition, returning the
    /// receiver half the dispatch loop awaits (with a timeout).
    pub async fn insert(
        &self,
        task_id: String,
        dispatch_start: DateTime<Utc>,
        progress: Arc<PlanProgress>,
    ) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let entry = PendingEntry {
            dispatch_start,
            progress,
            completion: tx,
        };
        self.inner.lock().await.insert(task_id, entry);
        rx
    }

    /// Atomically removes and returns the entry for `task_id`, if still
    /// present. The caller that wins this race is the one that gets to
    /// decide the task's terminal outcome.
    pub async fn take(&self, task_id: &str) -> Option<PendingEntry> {
        self.inner.lock().await.remove(task_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drains every remaining entry, dropping each completion sender so any
    /// dispatch-loop future still awaiting one observes a closed channel
    /// (spec §4.4 cancellation: "pending promises are rejected with
    /// `cancelled`").
    pub async fn cancel_all(&self) {
        self.inner.lock().await.clear();
    }
}

impl PendingEntry {
    /// Resolves the dispatch-side await. A send failure means the receiver
    /// already timed out and was dropped — not an error worth surfacing.
    pub fn resolve(self) {
        let _ = self.completion.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn take_is_exactly_once() {
        let pending = PendingMap::new();
        let progress = PlanProgress::new("session-1".to_string());
        let _rx = pending.insert("task-1".to_string(), Utc::now(), progress).await;

        let first = pending.take("task-1").await;
        let second = pending.take("task-1").await;
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn resolve_unblocks_the_receiver() {
        let pending = PendingMap::new();
        let progress = PlanProgress::new("session-1".to_string());
        let rx = pending.insert("task-1".to_string(), Utc::now(), progress).await;

        let entry = pending.take("task-1").await.unwrap();
        entry.resolve();

        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn cancel_all_empties_the_map() {
        let pending = PendingMap::new();
        let progress = PlanProgress::new("session-1".to_string());
        pending
            .insert("task-1".to_string(), Utc::now(), progress.clone())
            .await;
        pending.insert("task-2".to_string(), Utc::now(), progress).await;

        assert_eq!(pending.len().await, 2);
        pending.cancel_all().await;
        assert!(pending.is_empty().await);
    }
}
