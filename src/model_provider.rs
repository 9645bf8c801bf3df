//! Narrow model-provider capability (spec §6), consumed only by the
//! consensus engine's optional LLM-assisted compromise synthesis.
//!
//! Grounded on the reference's `claude_code::ClaudeCodeClient` trait seam
//! (a single narrow `async fn` behind `Arc<dyn _>` so the rest of the core
//! never depends on a concrete model backend) — reduced here to the one
//! operation the consensus engine actually needs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Generation parameters. Left minimal; a real backend is free to ignore
/// fields it doesn't support.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Strict JSON shape the consensus engine expects back from
/// `generate_content` when asking for a synthesized compromise (spec §4.5).
/// Any deviation — malformed JSON, a missing field — disables LLM-assisted
/// synthesis for that call; the engine falls back to its deterministic
/// algorithm rather than propagating the parse error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizedCompromise {
    pub analysis: String,
    pub target_file: String,
    pub suggested_change: String,
    pub reason: String,
}

/// External model backend contract. Implementations live outside this
/// crate; the core only ever sees this trait object.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn generate_content(
        &self,
        prompt: &str,
        settings: &GenerationSettings,
    ) -> crate::error::Result<ModelResponse>;
}
