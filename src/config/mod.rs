use crate::constants::*;
use crate::error::{OrchestrationError, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[cfg(test)]
mod tests;

/// Runtime configuration for the delegation/orchestration/consensus core.
///
/// Loaded once from the environment at startup via [`Config::load`], mirroring
/// the reference's `Config::load()` shape: read, parse-with-default, validate,
/// log the effective values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub task_max_attempts: u32,
    pub task_execution_timeout_ms: u64,
    pub requeue_scheduler_interval_ms: u64,
    pub simulate_agent_execution: bool,
    pub simulated_agent_delay_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub consensus_agreement_threshold: f64,
    pub consensus_llm_synthesis_enabled: bool,
    pub op_acceptance_constitutional_blocklist: Vec<String>,
    pub max_queue_size: usize,
    pub message_history_cap: usize,
    pub metrics_window_size: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("loaded .env file from: {:?}", path),
            Err(e) => tracing::debug!("no .env file loaded: {}", e),
        }

        let simulate_agent_execution = match env::var("DISABLE_REAL_AGENT_EXECUTION") {
            Ok(v) if parse_bool(&v) => {
                tracing::warn!(
                    "DISABLE_REAL_AGENT_EXECUTION is deprecated; treating as simulateAgentExecution=true"
                );
                true
            }
            _ => env_bool("SIMULATE_AGENT_EXECUTION", false),
        };

        let config = Config {
            task_max_attempts: env_parse("TASK_MAX_ATTEMPTS", DEFAULT_TASK_MAX_ATTEMPTS),
            task_execution_timeout_ms: env_parse(
                "TASK_EXECUTION_TIMEOUT_MS",
                DEFAULT_TASK_EXECUTION_TIMEOUT_MS,
            ),
            requeue_scheduler_interval_ms: env_parse(
                "REQUEUE_SCHEDULER_INTERVAL_MS",
                DEFAULT_REQUEUE_SCHEDULER_INTERVAL_MS,
            ),
            simulate_agent_execution,
            simulated_agent_delay_ms: env_parse(
                "SIMULATED_AGENT_DELAY_MS",
                DEFAULT_SIMULATED_AGENT_DELAY_MS,
            ),
            backoff_base_ms: env_parse("BACKOFF_BASE_MS", DEFAULT_BACKOFF_BASE_MS),
            backoff_cap_ms: env_parse("BACKOFF_CAP_MS", DEFAULT_BACKOFF_CAP_MS),
            consensus_agreement_threshold: env_parse(
                "CONSENSUS_AGREEMENT_THRESHOLD",
                DEFAULT_CONSENSUS_AGREEMENT_THRESHOLD,
            ),
            consensus_llm_synthesis_enabled: env_bool(
                "CONSENSUS_LLM_SYNTHESIS_ENABLED",
                DEFAULT_CONSENSUS_LLM_SYNTHESIS_ENABLED,
            ),
            op_acceptance_constitutional_blocklist: env::var(
                "OP_ACCEPTANCE_CONSTITUTIONAL_BLOCKLIST",
            )
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
            max_queue_size: env_parse("MAX_QUEUE_SIZE", MAX_QUEUE_SIZE),
            message_history_cap: env_parse("MESSAGE_HISTORY_CAP", DEFAULT_MESSAGE_HISTORY_CAP),
            metrics_window_size: env_parse("METRICS_WINDOW_SIZE", DEFAULT_METRICS_WINDOW_SIZE),
        };

        config.validate()?;

        tracing::info!(
            task_max_attempts = config.task_max_attempts,
            task_execution_timeout_ms = config.task_execution_timeout_ms,
            backoff_base_ms = config.backoff_base_ms,
            backoff_cap_ms = config.backoff_cap_ms,
            simulate_agent_execution = config.simulate_agent_execution,
            "configuration loaded"
        );

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.task_max_attempts == 0 {
            return Err(OrchestrationError::Configuration(
                "taskMaxAttempts must be at least 1".to_string(),
            ));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(OrchestrationError::Configuration(
                "backoffCapMs must be >= backoffBaseMs".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.consensus_agreement_threshold) {
            return Err(OrchestrationError::Configuration(
                "consensusAgreementThreshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            task_max_attempts: DEFAULT_TASK_MAX_ATTEMPTS,
            task_execution_timeout_ms: DEFAULT_TASK_EXECUTION_TIMEOUT_MS,
            requeue_scheduler_interval_ms: DEFAULT_REQUEUE_SCHEDULER_INTERVAL_MS,
            simulate_agent_execution: false,
            simulated_agent_delay_ms: DEFAULT_SIMULATED_AGENT_DELAY_MS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
            consensus_agreement_threshold: DEFAULT_CONSENSUS_AGREEMENT_THRESHOLD,
            consensus_llm_synthesis_enabled: DEFAULT_CONSENSUS_LLM_SYNTHESIS_ENABLED,
            op_acceptance_constitutional_blocklist: Vec::new(),
            max_queue_size: MAX_QUEUE_SIZE,
            message_history_cap: DEFAULT_MESSAGE_HISTORY_CAP,
            metrics_window_size: DEFAULT_METRICS_WINDOW_SIZE,
        }
    }
}

fn parse_bool(v: &str) -> bool {
    matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key).map(|v| parse_bool(&v)).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
