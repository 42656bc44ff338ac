use std::collections::HashSet;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::llm::{LanguageModel, extract_json_object};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coherence {
    pub score: f64,
    #[serde(default)]
    pub reason: String,
}

pub trait CoherenceScorer: Send + Sync {
    fn coherence(&self, original: &str, derived: &str) -> anyhow::Result<Coherence>;
}

/// Fraction of the original's distinct whitespace tokens that also occur in
/// the derived text.
pub fn lexical_recall(original: &str, derived: &str) -> f64 {
    let original_tokens = original.split_whitespace().collect::<HashSet<_>>();
    if original_tokens.is_empty() {
        return 0.0;
    }
    let derived_tokens = derived.split_whitespace().collect::<HashSet<_>>();
    let overlap = original_tokens.intersection(&derived_tokens).count();
    overlap as f64 / original_tokens.len() as f64
}

/// Coherence judged by a language model.
pub struct LlmCoherenceScorer<'a> {
    model: &'a dyn LanguageModel,
}

impl<'a> LlmCoherenceScorer<'a> {
    pub fn new(model: &'a dyn LanguageModel) -> Self {
        Self { model }
    }
}

#[derive(Debug, Serialize)]
struct CoherenceInput<'a> {
    original: &'a str,
    derived: &'a str,
}

impl CoherenceScorer for LlmCoherenceScorer<'_> {
    fn coherence(&self, original: &str, derived: &str) -> anyhow::Result<Coherence> {
        if original.trim().is_empty() || derived.trim().is_empty() {
            anyhow::bail!("coherence input is empty");
        }

        let input = CoherenceInput { original, derived };
        let input_json =
            serde_json::to_string_pretty(&input).context("serialize coherence input json")?;
        let prompt = format!(
            "You are a strict evaluator of summaries.\n\
\n\
Task: Judge whether `derived` is coherent with `original` and summarizes it correctly.\n\
\n\
BEGIN_COHERENCE_INPUT_JSON\n\
{input_json}\n\
END_COHERENCE_INPUT_JSON\n\
\n\
Scoring:\n\
- 1.0 means the summary keeps every requirement and detail a reader needs.\n\
- 0.0 means the summary is unrelated or contradicts the original.\n\
\n\
Output:\n\
- Output ONLY a single JSON object (no markdown fences, no commentary).\n\
- Schema: {{\"score\": 0.0, \"reason\": \"...\"}}\n"
        );

        let raw = self
            .model
            .generate(&prompt)
            .context("generate coherence judgement")?;
        let json = extract_json_object(&raw).context("extract coherence json")?;
        let mut coherence: Coherence =
            serde_json::from_str(json).context("parse coherence json")?;
        coherence.score = clamp_score(coherence.score);
        Ok(coherence)
    }
}

pub(crate) fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 1.0)
}
