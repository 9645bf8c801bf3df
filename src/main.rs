use anyhow::Result;
use orbitask_core::bus::CommunicationBus;
use orbitask_core::capability::{CAPABILITY_ANALYSIS, CAPABILITY_DEVELOPMENT};
use orbitask_core::config::Config;
use orbitask_core::delegation::{Recommendation, TaskDelegationService};
use orbitask_core::ids::SystemClock;
use orbitask_core::memory::{BackgroundAuditWriter, InMemoryMemoryStore};
use orbitask_core::models::{AgentHealth, AgentRecord, ErrorBudgetBurn, ProactiveSnapshot};
use orbitask_core::orchestrator::{ExecutePlanParams, Orchestrator};
use orbitask_core::registry::AgentRegistry;
use std::sync::Arc;
use tracing::{info, Level};

/// Demo entry point: wires the core's components together, registers a
/// couple of agents, harvests one proactive snapshot, and runs a single
/// dispatch wave to completion. Real deployments drive these same
/// components from a proactive observer and a scheduler loop instead of a
/// one-shot `main`.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("starting orbitask-core demo run");

    let config = Config::load()?;
    let clock: Arc<dyn orbitask_core::ids::Clock> = Arc::new(SystemClock);

    let registry = Arc::new(AgentRegistry::new());
    registry
        .register(AgentRecord {
            id: "dev-1".to_string(),
            name: "dev-1".to_string(),
            capabilities: [CAPABILITY_DEVELOPMENT.to_string()].into_iter().collect(),
            health: AgentHealth::Healthy,
            last_seen: clock.now_utc(),
        })
        .await;
    registry
        .register(AgentRecord {
            id: "analyst-1".to_string(),
            name: "analyst-1".to_string(),
            capabilities: [CAPABILITY_ANALYSIS.to_string()].into_iter().collect(),
            health: AgentHealth::Healthy,
            last_seen: clock.now_utc(),
        })
        .await;

    let bus = Arc::new(CommunicationBus::new(clock.clone(), config.message_history_cap));
    let memory_store = Arc::new(InMemoryMemoryStore::new(clock.clone()));
    let audit = BackgroundAuditWriter::new(memory_store);
    let delegation = Arc::new(TaskDelegationService::new(clock.clone(), audit, &config));
    let orchestrator = Orchestrator::new(registry, bus, delegation.clone(), clock.clone(), config);

    let snapshot = ProactiveSnapshot {
        taken_at: clock.now_utc(),
        recent_error_events: vec!["p99 latency spike on checkout-api".to_string()],
        error_budget_burn_hot: vec![ErrorBudgetBurn {
            operation: "checkout-api".to_string(),
            burn_rate: 2.4,
        }],
        memory_backend_status: "ok".to_string(),
    };
    let recommendations = vec![
        Recommendation::new("Refactor latency thresholds in checkout-api", "p99 latency spike on checkout-api"),
        Recommendation::new("Analyze recent error spikes across checkout-api", "p99 latency spike on checkout-api"),
    ];

    let task_ids = delegation.harvest_and_queue(&snapshot, &recommendations).await;
    info!(?task_ids, "harvested tasks from proactive snapshot");

    let result = orchestrator.execute_plan(ExecutePlanParams::default()).await;
    info!(
        dispatched = result.dispatched.len(),
        completed = result.completed.len(),
        failed = result.failed.len(),
        "execute_plan finished"
    );
    println!("{result:#?}");

    Ok(())
}
