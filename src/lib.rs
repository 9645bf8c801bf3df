//! # Orbitask Core
//!
//! Orbitask Core is the multi-agent orchestration core of an AI agent
//! platform: it accepts a proactive plan, selects a qualified agent for each
//! recommended action, dispatches the work over a typed communication bus,
//! tracks execution asynchronously with timeouts and retries, and resolves
//! disagreement among multiple agent responses into a single decision.
//!
//! ## Architecture
//!
//! The core is four tightly coupled components wired together by explicit
//! dependency injection, plus the supporting services they share:
//!
//! - **Task delegation service** ([`delegation`]) — task records, the
//!   `queued -> dispatched -> {completed | failed}` lifecycle, retry/backoff,
//!   and harvest-from-snapshot deduplication.
//! - **Orchestrator** ([`orchestrator`]) — drives dispatch waves, awaits
//!   agent replies over the bus, enforces per-task timeouts and dependency
//!   gating, and emits progress and metrics.
//! - **Communication bus** ([`bus`]) — sessioned, typed message transport
//!   with FIFO-per-session delivery and an event stream.
//! - **Consensus engine** ([`consensus`]) — resolves multiple agent
//!   viewpoints into a single decision with compromise synthesis.
//!
//! Agent selection goes through the **agent registry** ([`registry`]), a
//! capability-based directory; task text is mapped to a capability tag by
//! the **capability classifier** ([`capability`]). Audit records flow
//! through the **memory store** contract ([`memory`]); configuration is
//! loaded once at startup ([`config`]).
//!
//! What this crate does *not* specify: how individual agents produce
//! replies, natural-language prompt engineering, the vector-memory storage
//! engine's internals, GUI/CLI presentation, or bindings to a specific model
//! provider beyond the narrow [`model_provider`] capability interface.

/// Sessioned, typed message bus connecting the orchestrator and agents.
pub mod bus;
/// Deterministic action-text to capability classifier.
pub mod capability;
/// Runtime configuration, loaded from the environment.
pub mod config;
/// Consensus engine: resolves multiple agent viewpoints into one decision.
pub mod consensus;
/// Default tunables shared by config and the runtime.
pub mod constants;
/// Task delegation service: lifecycle, retry/backoff, dedup.
pub mod delegation;
/// Error taxonomy and the crate-wide `Result` alias.
pub mod error;
/// Clock abstraction and identifier generation.
pub mod ids;
/// Memory store contract consumed for audit and feedback persistence.
pub mod memory;
/// Narrow model-provider capability consumed by the consensus engine.
pub mod model_provider;
/// Core data model shared across the components above.
pub mod models;
/// Hybrid orchestrator: dispatch waves, timeouts, cancellation, metrics.
pub mod orchestrator;
/// Agent registry: capability-based discovery.
pub mod registry;

#[cfg(test)]
mod tests;

pub use error::{OrchestrationError, Result};
