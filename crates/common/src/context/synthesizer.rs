//! Answer Synthesizer - merges the reasoning chain into one answer
//!
//! Pure and CPU-bound. The output contract is strict: synthesized text must
//! be indistinguishable in tone from a single-shot answer. No meta-phrases
//! about analysis or reasoning, no mention of degraded steps, and the chain
//! itself only ever travels in a separate response field.

use crate::context::types::ReasoningStep;

/// Exact answer used when no usable reasoning output exists
pub const INSUFFICIENT_INFORMATION: &str =
    "Unable to generate an answer due to insufficient information.";

/// Connectives used to join intermediate answers
const CONNECTIVES: &[&str] = &["Additionally", "Furthermore", "Beyond that", "Finally"];

/// Synthesized answer with chain accounting
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAnswer {
    pub answer: String,
    pub steps_used: usize,
    pub confidence: f32,
}

/// Pure synthesizer over an ordered reasoning chain
#[derive(Debug, Clone, Copy, Default)]
pub struct AnswerSynthesizer;

impl AnswerSynthesizer {
    pub fn new() -> Self {
        Self
    }

    /// Merge the chain into a single answer.
    ///
    /// - zero usable steps: the fixed insufficient-information answer
    /// - one usable step: its intermediate answer, verbatim
    /// - several: joined with connective transitions, duplicates dropped
    pub fn synthesize(&self, question: &str, chain: &[ReasoningStep]) -> SynthesizedAnswer {
        let usable: Vec<&ReasoningStep> = chain
            .iter()
            .filter(|step| step.is_usable() && step.intermediate_answer.trim() != question.trim())
            .collect();

        if usable.is_empty() {
            return SynthesizedAnswer {
                answer: INSUFFICIENT_INFORMATION.to_string(),
                steps_used: 0,
                confidence: 0.0,
            };
        }

        let confidence =
            usable.iter().map(|s| s.confidence).sum::<f32>() / usable.len() as f32;

        if usable.len() == 1 {
            return SynthesizedAnswer {
                answer: usable[0].intermediate_answer.clone(),
                steps_used: 1,
                confidence,
            };
        }

        let mut parts: Vec<String> = Vec::with_capacity(usable.len());
        let mut seen: Vec<String> = Vec::new();
        for step in &usable {
            let scrubbed = scrub_meta_prefix(step.intermediate_answer.trim());
            let normalized = normalize(&scrubbed);
            if normalized.is_empty() || seen.contains(&normalized) {
                continue;
            }
            seen.push(normalized);
            parts.push(scrubbed);
        }

        let mut answer = String::new();
        for (i, part) in parts.iter().enumerate() {
            if i == 0 {
                answer.push_str(part);
            } else {
                let connective = CONNECTIVES[(i - 1) % CONNECTIVES.len()];
                answer.push(' ');
                answer.push_str(connective);
                answer.push_str(", ");
                answer.push_str(&decapitalize(part));
            }
            if !answer.ends_with(['.', '!', '?']) {
                answer.push('.');
            }
        }

        SynthesizedAnswer {
            answer,
            steps_used: parts.len(),
            confidence,
        }
    }
}

/// Strip meta-referential openings like "Based on the analysis, ..."
fn scrub_meta_prefix(answer: &str) -> String {
    let pattern = regex_lite::Regex::new(
        r"(?i)^\s*(based on|according to|from|after|following) (the |my |this )?(provided |retrieved )?(analysis|reasoning|reasoning process|documents analyzed|context analysis)( of [^,:]*)?[,:]\s*",
    )
    .unwrap();
    let scrubbed = pattern.replace(answer, "").to_string();
    if scrubbed.is_empty() {
        answer.to_string()
    } else {
        capitalize(&scrubbed)
    }
}

/// Lowercase the leading letter unless it starts an acronym
fn decapitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => {
            let rest: String = chars.collect();
            // "NASA launched" keeps its case; "The method" does not.
            if rest.chars().next().map_or(false, |c| c.is_uppercase()) {
                text.to_string()
            } else {
                first.to_lowercase().collect::<String>() + &rest
            }
        }
        None => String::new(),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Normalization for duplicate-answer detection
fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
