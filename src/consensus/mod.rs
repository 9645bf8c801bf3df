//! Consensus engine (C7): resolves disagreement among several agent
//! viewpoints into a single decision.
//!
//! Grounded on the `request_consensus`/`consensus` naming from the pack's
//! multi-agent coordinator reference and the teacher's "validate strictly,
//! fall back to deterministic on any parse failure" posture it applies
//! throughout its `claude_code` response handling.

use crate::model_provider::{GenerationSettings, ModelProvider, SynthesizedCompromise};
use crate::models::{ConsensusResult, ViewPoint};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

const OPPOSITION_MARKERS: [&str; 6] = ["no", "not", "disagree", "reject", "against", "oppose"];

const STOP_WORDS: [&str; 17] = [
    "the", "a", "an", "and", "or", "but", "to", "of", "in", "on", "for", "with", "is", "are",
    "this", "that", "it",
];

/// Configuration the engine needs from [`crate::config::Config`], copied out
/// so `ConsensusEngine` doesn't depend on the whole config struct.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    pub agreement_threshold: f64,
    pub constitutional_blocklist: Vec<String>,
    pub llm_synthesis_enabled: bool,
}

impl From<&crate::config::Config> for ConsensusConfig {
    fn from(config: &crate::config::Config) -> Self {
        ConsensusConfig {
            agreement_threshold: config.consensus_agreement_threshold,
            constitutional_blocklist: config.op_acceptance_constitutional_blocklist.clone(),
            llm_synthesis_enabled: config.consensus_llm_synthesis_enabled,
        }
    }
}

/// Resolves a set of [`ViewPoint`]s against a proposal into a
/// [`ConsensusResult`] (spec §4.5). Stateless aside from its config and an
/// optional model provider; safe to share across plans via `Arc`.
pub struct ConsensusEngine {
    config: ConsensusConfig,
    model_provider: Option<Arc<dyn ModelProvider>>,
}

impl ConsensusEngine {
    pub fn new(config: ConsensusConfig) -> Self {
        ConsensusEngine {
            config,
            model_provider: None,
        }
    }

    pub fn with_model_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.model_provider = Some(provider);
        self
    }

    /// Fewer than two viewpoints short-circuits to `agreed=false,
    /// consensusLevel=0` (spec §4.5 failure modes) — there is nothing to
    /// reach consensus over.
    pub async fn resolve(&self, viewpoints: &[ViewPoint], proposal: &str) -> ConsensusResult {
        if viewpoints.len() < 2 {
            return ConsensusResult {
                agreed: false,
                consensus_level: 0.0,
                supporting_agents: Vec::new(),
                objecting_agents: Vec::new(),
                neutral_agents: Vec::new(),
                final_decision: proposal.to_string(),
                compromises_reached: Vec::new(),
                quality_score: 0.0,
                constitutionally_validated: true,
            };
        }

        let overall_agreement = average_pairwise_similarity(viewpoints);

        let mut supporting = Vec::new();
        let mut objecting = Vec::new();
        let mut neutral = Vec::new();
        for vp in viewpoints {
            let sim = jaccard_similarity(&vp.position, proposal);
            if sim > crate::constants::SUPPORT_SIMILARITY_THRESHOLD {
                supporting.push(vp.agent_id.clone());
            } else if contains_opposition_marker(&vp.position) && sim < crate::constants::OBJECTION_SIMILARITY_THRESHOLD {
                objecting.push(vp.agent_id.clone());
            } else {
                neutral.push(vp.agent_id.clone());
            }
        }

        let consensus_level = supporting.len() as f64 / viewpoints.len() as f64;

        let (final_decision, compromises_reached) = if consensus_level >= self.config.agreement_threshold {
            (proposal.to_string(), Vec::new())
        } else {
            self.synthesize_compromise(viewpoints, proposal).await
        };

        let constitutionally_validated = !violates_blocklist(&final_decision, &self.config.constitutional_blocklist);
        let agreed = consensus_level >= self.config.agreement_threshold && constitutionally_validated;
        let quality_score = if constitutionally_validated {
            (consensus_level + overall_agreement) / 2.0
        } else {
            0.0
        };

        ConsensusResult {
            agreed,
            consensus_level,
            supporting_agents: supporting,
            objecting_agents: objecting,
            neutral_agents: neutral,
            final_decision,
            compromises_reached,
            quality_score,
            constitutionally_validated,
        }
    }

    /// Step 6 of spec §4.5: group conflicting viewpoints by a topic keyword,
    /// take each group's common-ground words (length ≥ 3), score by
    /// `commonWordCount · groupSize / totalWords`, and use the
    /// highest-scoring compromise as the final decision. Tries the
    /// model-assisted path first when configured; any failure (disabled,
    /// no provider, malformed response) falls back to this deterministic
    /// algorithm.
    async fn synthesize_compromise(&self, viewpoints: &[ViewPoint], proposal: &str) -> (String, Vec<String>) {
        if self.config.llm_synthesis_enabled {
            if let Some(provider) = &self.model_provider {
                match self.try_llm_synthesis(provider.as_ref(), viewpoints, proposal).await {
                    Some(compromise) => return (compromise.clone(), vec![compromise]),
                    None => {
                        warn!("LLM-assisted consensus synthesis failed validation; falling back to deterministic synthesis");
                    }
                }
            }
        }

        let groups = group_by_topic_keyword(viewpoints);
        let total_words: usize = viewpoints.iter().map(|vp| word_set(&vp.position).len()).sum::<usize>().max(1);

        let mut scored: Vec<(f64, String)> = groups
            .into_iter()
            .filter_map(|group| {
                let common = common_ground_words(&group);
                if common.is_empty() {
                    return None;
                }
                let score = common.len() as f64 * group.len() as f64 / total_words as f64;
                let mut words: Vec<&str> = common.iter().map(|s| s.as_str()).collect();
                words.sort_unstable();
                let description = format!("Incorporating common ground: {}", words.join(", "));
                Some((score, description))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        match scored.into_iter().next() {
            Some((_, description)) => (description.clone(), vec![description]),
            None => (proposal.to_string(), Vec::new()),
        }
    }

    async fn try_llm_synthesis(
        &self,
        provider: &dyn ModelProvider,
        viewpoints: &[ViewPoint],
        proposal: &str,
    ) -> Option<String> {
        let prompt = format!(
            "Proposal: {proposal}\nViewpoints:\n{}\nRespond with strict JSON {{analysis, targetFile, suggestedChange, reason}}.",
            viewpoints
                .iter()
                .map(|vp| format!("- {} ({:.2}): {}", vp.agent_id, vp.confidence, vp.position))
                .collect::<Vec<_>>()
                .join("\n")
        );
        let response = provider
            .generate_content(&prompt, &GenerationSettings::default())
            .await
            .ok()?;
        let parsed: SynthesizedCompromise = serde_json::from_str(&response.text).ok()?;
        Some(parsed.suggested_change)
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

/// Bag-of-words Jaccard similarity over non-stop-word tokens.
fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a = word_set(a);
    let set_b = word_set(b);
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn contains_opposition_marker(text: &str) -> bool {
    let words = word_set_with_stop_words(text);
    OPPOSITION_MARKERS.iter().any(|marker| words.contains(*marker))
}

fn word_set_with_stop_words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect()
}

fn average_pairwise_similarity(viewpoints: &[ViewPoint]) -> f64 {
    let n = viewpoints.len();
    if n < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    let mut count = 0;
    for i in 0..n {
        for j in (i + 1)..n {
            total += jaccard_similarity(&viewpoints[i].position, &viewpoints[j].position);
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// Groups viewpoints by their most frequent non-stop-word token ("topic
/// keyword"), used to cluster conflicting positions before synthesizing a
/// compromise per group.
fn group_by_topic_keyword<'a>(viewpoints: &'a [ViewPoint]) -> Vec<Vec<&'a ViewPoint>> {
    use std::collections::BTreeMap;
    let mut groups: BTreeMap<String, Vec<&ViewPoint>> = BTreeMap::new();
    for vp in viewpoints {
        let keyword = topic_keyword(&vp.position).unwrap_or_else(|| "general".to_string());
        groups.entry(keyword).or_default().push(vp);
    }
    groups.into_values().collect()
}

fn topic_keyword(text: &str) -> Option<String> {
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for word in word_set(text) {
        *counts.entry(word).or_insert(0) += 1;
    }
    counts.into_iter().max_by_key(|(_, count)| *count).map(|(word, _)| word)
}

/// Intersection of every viewpoint's word set in `group`, restricted to
/// words of length ≥ `COMMON_GROUND_MIN_WORD_LEN` (spec §4.5 step 6).
fn common_ground_words(group: &[&ViewPoint]) -> HashSet<String> {
    let mut iter = group.iter();
    let Some(first) = iter.next() else {
        return HashSet::new();
    };
    let mut common = word_set(&first.position);
    for vp in iter {
        let words = word_set(&vp.position);
        common.retain(|w| words.contains(w));
    }
    common.retain(|w| w.len() >= crate::constants::COMMON_GROUND_MIN_WORD_LEN);
    common
}

fn violates_blocklist(text: &str, blocklist: &[String]) -> bool {
    if blocklist.is_empty() {
        return false;
    }
    let lower = text.to_lowercase();
    blocklist.iter().any(|word| lower.contains(word.as_str()))
}
