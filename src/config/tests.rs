use super::*;
use serial_test::serial;

fn cleanup_test_env() {
    for key in [
        "TASK_MAX_ATTEMPTS",
        "TASK_EXECUTION_TIMEOUT_MS",
        "REQUEUE_SCHEDULER_INTERVAL_MS",
        "SIMULATE_AGENT_EXECUTION",
        "DISABLE_REAL_AGENT_EXECUTION",
        "SIMULATED_AGENT_DELAY_MS",
        "BACKOFF_BASE_MS",
        "BACKOFF_CAP_MS",
        "CONSENSUS_AGREEMENT_THRESHOLD",
        "CONSENSUS_LLM_SYNTHESIS_ENABLED",
        "OP_ACCEPTANCE_CONSTITUTIONAL_BLOCKLIST",
        "MAX_QUEUE_SIZE",
        "MESSAGE_HISTORY_CAP",
        "METRICS_WINDOW_SIZE",
    ] {
        env::remove_var(key);
    }
}

#[test]
#[serial]
fn defaults_match_spec_table() {
    cleanup_test_env();
    let config = Config::load().expect("default config should load");
    assert_eq!(config.task_max_attempts, 3);
    assert_eq!(config.task_execution_timeout_ms, 4_000);
    assert_eq!(config.requeue_scheduler_interval_ms, 0);
    assert!(!config.simulate_agent_execution);
    assert_eq!(config.simulated_agent_delay_ms, 120);
    assert_eq!(config.backoff_base_ms, 500);
    assert_eq!(config.backoff_cap_ms, 30_000);
    assert_eq!(config.max_queue_size, 1000);
    assert_eq!(config.message_history_cap, 10_000);
    assert_eq!(config.metrics_window_size, 1000);
    assert!(!config.consensus_llm_synthesis_enabled);
    cleanup_test_env();
}

#[test]
#[serial]
fn malformed_numeric_env_falls_back_to_default() {
    cleanup_test_env();
    env::set_var("TASK_MAX_ATTEMPTS", "not-a-number");
    let config = Config::load().expect("config should load despite malformed input");
    assert_eq!(config.task_max_attempts, 3);
    cleanup_test_env();
}

#[test]
#[serial]
fn deprecated_disable_flag_maps_to_simulate_agent_execution() {
    cleanup_test_env();
    env::set_var("DISABLE_REAL_AGENT_EXECUTION", "true");
    let config = Config::load().expect("config should load");
    assert!(config.simulate_agent_execution);
    cleanup_test_env();
}

#[test]
#[serial]
fn blocklist_is_parsed_and_lowercased() {
    cleanup_test_env();
    env::set_var("OP_ACCEPTANCE_CONSTITUTIONAL_BLOCKLIST", "Delete, DROP TABLE , ");
    let config = Config::load().expect("config should load");
    assert_eq!(
        config.op_acceptance_constitutional_blocklist,
        vec!["delete".to_string(), "drop table".to_string()]
    );
    cleanup_test_env();
}

#[test]
#[serial]
fn rejects_backoff_cap_below_base() {
    cleanup_test_env();
    env::set_var("BACKOFF_BASE_MS", "1000");
    env::set_var("BACKOFF_CAP_MS", "100");
    let result = Config::load();
    assert!(result.is_err());
    cleanup_test_env();
}

#[test]
#[serial]
fn rejects_out_of_range_consensus_threshold() {
    cleanup_test_env();
    env::set_var("CONSENSUS_AGREEMENT_THRESHOLD", "1.5");
    let result = Config::load();
    assert!(result.is_err());
    cleanup_test_env();
}

#[test]
#[serial]
fn rejects_zero_max_attempts() {
    cleanup_test_env();
    env::set_var("TASK_MAX_ATTEMPTS", "0");
    let result = Config::load();
    assert!(result.is_err());
    cleanup_test_env();
}
