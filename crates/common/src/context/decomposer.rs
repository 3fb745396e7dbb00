//! Question Decomposer - turns a complex question into an ordered plan
//!
//! Uses the external generator to propose sub-questions, then validates the
//! proposal: empty plans, echoes of the original question, near-duplicates,
//! and oversized plans are all rejected. Any failure degrades to treating
//! the original question as its own single-step plan.

use crate::llm::{GenerationRequest, Generator};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Decomposer configuration
#[derive(Debug, Clone)]
pub struct DecomposerConfig {
    /// Maximum decomposition depth
    pub max_depth: usize,

    /// Output token budget for the decomposition call
    pub max_tokens: usize,

    /// Word-overlap ratio above which two sub-questions count as duplicates
    pub duplicate_threshold: f32,
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_tokens: 400,
            duplicate_threshold: 0.85,
        }
    }
}

/// Generator-backed question decomposer
pub struct QuestionDecomposer {
    generator: Arc<dyn Generator>,
    config: DecomposerConfig,
}

impl QuestionDecomposer {
    pub fn new(generator: Arc<dyn Generator>, config: DecomposerConfig) -> Self {
        Self { generator, config }
    }

    /// Decompose a question into an ordered plan of 1..=max_steps sub-questions.
    ///
    /// Never returns an empty plan: on generator failure or an unusable
    /// proposal the original question becomes the single step.
    pub async fn decompose(&self, question: &str, max_steps: usize) -> Vec<String> {
        let max_steps = max_steps.max(1);
        if self.config.max_depth == 0 {
            return vec![question.to_string()];
        }
        let prompt = self.build_prompt(question, max_steps);
        let request = GenerationRequest::new(prompt)
            .with_system("You decompose questions for a document search system.")
            .with_max_tokens(self.config.max_tokens);

        let proposal = match self.generator.generate(&request).await {
            Ok(generation) => generation.text,
            Err(e) => {
                warn!(error = %e, "Decomposition call failed, using single-step plan");
                return vec![question.to_string()];
            }
        };

        let plan = self.validate(question, parse_plan(&proposal), max_steps);
        if plan.is_empty() {
            debug!("Decomposition produced no usable sub-questions, using single-step plan");
            return vec![question.to_string()];
        }
        plan
    }

    fn build_prompt(&self, question: &str, max_steps: usize) -> String {
        format!(
            "Break the question below into at most {} self-contained sub-questions \
             that can each be answered from a document collection.\n\
             Rules:\n\
             - one sub-question per line, numbered like \"1.\"\n\
             - no commentary before or after the list\n\
             - order the sub-questions so later ones may build on earlier ones\n\
             - if the question is already simple, return it unchanged as the only item\n\n\
             Question:\n{}\n\nAnswer:",
            max_steps, question
        )
    }

    /// Apply the rejection rules to a parsed proposal
    fn validate(&self, original: &str, candidates: Vec<String>, max_steps: usize) -> Vec<String> {
        let original_norm = normalize(original);
        let mut kept: Vec<String> = Vec::new();
        let mut kept_norms: Vec<HashSet<String>> = Vec::new();

        for candidate in candidates {
            if kept.len() >= max_steps {
                break;
            }
            let norm = normalize(&candidate);
            if norm.len() < 3 {
                continue;
            }
            // Loop prevention: a sub-question identical to the original
            // would retrieve and reason on the same thing forever.
            if norm == original_norm {
                continue;
            }
            let words: HashSet<String> = norm.split_whitespace().map(str::to_string).collect();
            let duplicate = kept_norms
                .iter()
                .any(|prev| word_overlap(prev, &words) >= self.config.duplicate_threshold);
            if duplicate {
                continue;
            }
            kept.push(candidate);
            kept_norms.push(words);
        }

        kept
    }
}

/// Parse a numbered or bulleted list into plan lines
fn parse_plan(text: &str) -> Vec<String> {
    let prefix = regex_lite::Regex::new(r"^\s*(?:\d+[.)]|[-*])\s*").unwrap();
    text.lines()
        .map(|line| prefix.replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Lowercased alphanumeric normalization for duplicate detection
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if c.is_whitespace() && !out.ends_with(' ') {
            out.push(' ');
        }
    }
    out.trim().to_string()
}

/// Jaccard overlap between two word sets
fn word_overlap(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f32 / union as f32
}
