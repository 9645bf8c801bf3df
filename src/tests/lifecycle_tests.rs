//! Lifecycle tests: happy and error paths through full component
//! interactions, rather than a single module in isolation.

#[cfg(test)]
mod orchestrator_lifecycle {
    use crate::bus::CommunicationBus;
    use crate::config::Config;
    use crate::delegation::{Recommendation, TaskDelegationService};
    use crate::ids::{Clock, SystemClock};
    use crate::memory::{BackgroundAuditWriter, InMemoryMemoryStore};
    use crate::models::{AgentHealth, AgentRecord, ErrorBudgetBurn, ProactiveSnapshot};
    use crate::orchestrator::{ExecutePlanParams, Orchestrator};
    use crate::registry::AgentRegistry;
    use std::sync::Arc;

    struct Harness {
        orchestrator: Orchestrator,
        registry: Arc<AgentRegistry>,
        delegation: Arc<TaskDelegationService>,
    }

    fn build(config: Config) -> Harness {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let registry = Arc::new(AgentRegistry::new());
        let bus = Arc::new(CommunicationBus::new(clock.clone(), config.message_history_cap));
        let store = Arc::new(InMemoryMemoryStore::new(clock.clone()));
        let audit = BackgroundAuditWriter::new(store);
        let delegation = Arc::new(TaskDelegationService::new(clock.clone(), audit, &config));
        let orchestrator = Orchestrator::new(registry.clone(), bus, delegation.clone(), clock, config);
        Harness {
            orchestrator,
            registry,
            delegation,
        }
    }

    fn snapshot() -> ProactiveSnapshot {
        ProactiveSnapshot {
            taken_at: chrono::Utc::now(),
            recent_error_events: vec!["p99 latency spike".to_string()],
            error_budget_burn_hot: vec![ErrorBudgetBurn {
                operation: "checkout-api".to_string(),
                burn_rate: 1.8,
            }],
            memory_backend_status: "ok".to_string(),
        }
    }

    /// Happy path (spec §8 S1): harvest one recommendation, discover a
    /// capable agent, dispatch, and observe a completed task with a
    /// recorded duration and a fresh metrics sample.
    #[tokio::test]
    async fn happy_path_harvest_through_completion() {
        let harness = build(Config {
            simulate_agent_execution: true,
            simulated_agent_delay_ms: 5,
            task_execution_timeout_ms: 2_000,
            ..Config::default()
        });
        harness
            .registry
            .register(AgentRecord {
                id: "dev-1".to_string(),
                name: "dev-1".to_string(),
                capabilities: ["development".to_string()].into_iter().collect(),
                health: AgentHealth::Healthy,
                last_seen: chrono::Utc::now(),
            })
            .await;

        let recs = vec![Recommendation::new("Refactor latency thresholds", "p99 latency spike")];
        let task_ids = harness.delegation.harvest_and_queue(&snapshot(), &recs).await;
        assert_eq!(task_ids.len(), 1);

        let result = harness.orchestrator.execute_plan(ExecutePlanParams::default()).await;
        assert_eq!(result.dispatched, task_ids);
        assert_eq!(result.completed, task_ids);
        assert!(result.failed.is_empty());

        let task = harness.delegation.get_task(&task_ids[0]).await.unwrap();
        assert!(task.duration_ms.unwrap_or(0) > 0);

        let counters = harness.orchestrator.plan_counters();
        assert_eq!(counters.completed, 1);
        assert_eq!(counters.failed, 0);
    }

    /// Error path (spec §8 "All agents unknown"): with no agents
    /// registered, every harvested task fails immediately with `no_agent`
    /// and no message is ever sent, across two independent recommendations.
    #[tokio::test]
    async fn no_agents_registered_fails_every_task_with_no_agent() {
        let harness = build(Config::default());
        let recs = vec![
            Recommendation::new("Refactor latency thresholds", "p99 latency spike"),
            Recommendation::new("Document the incident runbook", "p99 latency spike"),
        ];
        harness.delegation.harvest_and_queue(&snapshot(), &recs).await;

        let result = harness.orchestrator.execute_plan(ExecutePlanParams::default()).await;
        assert_eq!(result.dispatched.len(), 2);
        assert!(result.completed.is_empty());
        assert_eq!(result.failed.len(), 2);
        assert!(result
            .failed
            .iter()
            .all(|f| f.error_code.as_deref() == Some("no_agent")));
    }

    /// Empty plan boundary (spec §8): no queued tasks produces an empty,
    /// side-effect-free result.
    #[tokio::test]
    async fn empty_plan_returns_empty_result() {
        let harness = build(Config::default());
        let result = harness.orchestrator.execute_plan(ExecutePlanParams::default()).await;
        assert!(result.dispatched.is_empty());
        assert!(result.completed.is_empty());
        assert!(result.failed.is_empty());
    }
}

#[cfg(test)]
mod delegation_lifecycle {
    use crate::delegation::{Recommendation, TaskDelegationService};
    use crate::ids::SystemClock;
    use crate::memory::{BackgroundAuditWriter, InMemoryMemoryStore};
    use crate::models::{ProactiveSnapshot, TaskStatus};
    use crate::config::Config;
    use std::sync::Arc;

    fn service(config: Config) -> TaskDelegationService {
        let clock = Arc::new(SystemClock);
        let store = Arc::new(InMemoryMemoryStore::new(clock.clone()));
        let audit = BackgroundAuditWriter::new(store);
        TaskDelegationService::new(clock, audit, &config)
    }

    fn snapshot() -> ProactiveSnapshot {
        ProactiveSnapshot {
            taken_at: chrono::Utc::now(),
            recent_error_events: vec![],
            error_budget_burn_hot: vec![],
            memory_backend_status: "ok".to_string(),
        }
    }

    /// Retry-then-succeed path (spec §8 S2): a dispatch failure requeues
    /// the task with backoff rather than failing it terminally, and a
    /// subsequent successful execution completes it.
    #[tokio::test]
    async fn send_failure_requeues_then_succeeds_on_retry() {
        let service = service(Config {
            backoff_base_ms: 5,
            backoff_cap_ms: 50,
            ..Config::default()
        });
        let ids = service
            .harvest_and_queue(&snapshot(), &[Recommendation::new("Refactor latency thresholds", "spike")])
            .await;

        service.mark_dispatched(&ids[0]).await;
        assert!(service.mark_dispatch_failure(&ids[0], "connection reset").await);

        let mid = service.get_task(&ids[0]).await.unwrap();
        assert_eq!(mid.status, TaskStatus::Queued);
        assert_eq!(mid.attempts, 1);

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        let due = service.process_due_requeues(chrono::Utc::now()).await;
        assert!(due.contains(&ids[0]));

        assert!(service.mark_dispatched(&ids[0]).await);
        assert!(
            service
                .mark_execution_result(&ids[0], true, None, None, Some(42))
                .await
        );

        let done = service.get_task(&ids[0]).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.attempts, 1);
    }

    /// Dedup round trip (spec §8 S6): harvesting the identical snapshot
    /// twice while the task is still non-terminal yields zero new ids the
    /// second time; the total task count is unchanged.
    #[tokio::test]
    async fn harvesting_identical_snapshot_twice_is_idempotent() {
        let service = service(Config::default());
        let snap = snapshot();
        let recs = vec![Recommendation::new("Analyze recent error spikes", "spike")];

        let first = service.harvest_and_queue(&snap, &recs).await;
        let second = service.harvest_and_queue(&snap, &recs).await;

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(
            service
                .get_all_tasks(crate::delegation::TaskFilter::default())
                .await
                .len(),
            1
        );
    }
}

#[cfg(test)]
mod bus_lifecycle {
    use crate::bus::{CommunicationBus, SendParams, SessionParams};
    use crate::ids::SystemClock;
    use crate::models::{MessageType, SessionMode};
    use std::collections::HashMap;
    use std::sync::Arc;

    /// FIFO round trip (spec §8 property 4): messages sent in order on the
    /// same session are observed in the same order in history, and a
    /// live subscriber sees every message sent after it attached.
    #[tokio::test]
    async fn session_round_trip_preserves_send_order_for_history_and_subscribers() {
        let bus = CommunicationBus::new(Arc::new(SystemClock), 100);
        let session_id = bus
            .create_session(SessionParams {
                participants: vec!["orchestrator".to_string(), "dev-1".to_string()],
                mode: SessionMode::Collaborative,
                topic: "lifecycle".to_string(),
                consensus_enabled: false,
            })
            .await;

        let mut rx = bus.subscribe();
        for i in 0..3 {
            bus.send_message(SendParams {
                session_id: session_id.clone(),
                from_agent: "orchestrator".to_string(),
                to_agent: Some("dev-1".to_string()),
                message_type: MessageType::Update,
                content: format!("step {i}"),
                metadata: HashMap::new(),
            })
            .await
            .unwrap();
        }

        let history = bus.get_message_history(&session_id, 10).await.unwrap();
        let ordered: Vec<&str> = history.iter().rev().map(|m| m.content.as_str()).collect();
        assert_eq!(ordered, vec!["step 0", "step 1", "step 2"]);

        for expected in ["step 0", "step 1", "step 2"] {
            let received = rx.recv().await.unwrap();
            assert_eq!(received.content, expected);
        }
    }
}

#[cfg(test)]
mod consensus_lifecycle {
    use crate::consensus::{ConsensusConfig, ConsensusEngine};
    use crate::models::ViewPoint;

    /// Spec §8 S5: two agents support, one objects; consensus level lands
    /// below the default threshold and the engine synthesizes a compromise
    /// instead of accepting the proposal outright.
    #[tokio::test]
    async fn split_viewpoints_fall_back_to_compromise_synthesis() {
        let engine = ConsensusEngine::new(ConsensusConfig {
            agreement_threshold: 0.7,
            constitutional_blocklist: Vec::new(),
            llm_synthesis_enabled: false,
        });

        let viewpoints = vec![
            ViewPoint {
                agent_id: "a".to_string(),
                position: "prefer plan x because cost savings".to_string(),
                confidence: 0.8,
            },
            ViewPoint {
                agent_id: "b".to_string(),
                position: "prefer plan x because faster delivery".to_string(),
                confidence: 0.7,
            },
            ViewPoint {
                agent_id: "c".to_string(),
                position: "oppose plan x, too many risks".to_string(),
                confidence: 0.6,
            },
        ];

        let result = engine.resolve(&viewpoints, "adopt plan x").await;
        assert!(!result.agreed);
        assert!(!result.compromises_reached.is_empty());
        assert!(result.consensus_level < 0.7);
    }
}
