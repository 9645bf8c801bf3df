//! Deterministic action-text -> capability tag mapper (§ glossary:
//! "Capability classifier"), repurposed from the reference's keyword-based
//! `AgentType::from_mention` idiom.

const DEVELOPMENT_KEYWORDS: [&str; 3] = ["optimiz", "refactor", "code"];
const DOCUMENTATION_KEYWORDS: [&str; 2] = ["document", "write"];
const ANALYSIS_KEYWORDS: [&str; 2] = ["analyz", "analysis"];

/// Opaque capability tag advertised by agents and required by tasks.
pub const CAPABILITY_DEVELOPMENT: &str = "development";
pub const CAPABILITY_DOCUMENTATION: &str = "documentation";
pub const CAPABILITY_ANALYSIS: &str = "analysis";
pub const CAPABILITY_GENERAL: &str = "general";

/// Classifies free-form action text into a capability tag.
pub fn classify(action: &str) -> &'static str {
    let lower = action.to_lowercase();
    if DEVELOPMENT_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        CAPABILITY_DEVELOPMENT
    } else if DOCUMENTATION_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        CAPABILITY_DOCUMENTATION
    } else if ANALYSIS_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        CAPABILITY_ANALYSIS
    } else {
        CAPABILITY_GENERAL
    }
}
