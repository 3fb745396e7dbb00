//! Question Classifier - decides whether a question needs multi-step reasoning
//!
//! Pure heuristic pattern matching over connectives, interrogative words,
//! and clause markers. No side effects, no external calls. False negatives
//! degrade to single-shot answering; false positives only cost latency, so
//! the heuristics lean toward sensitivity.

use serde::{Deserialize, Serialize};

/// Question pattern detected by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionPattern {
    /// Several questions folded into one
    MultiPart,
    /// Asks for causes or effects
    Causal,
    /// Asks to compare alternatives
    Comparative,
    /// Asks for a method or sequence of actions
    Procedural,
    /// Asks for a definition together with examples
    DefinitionalWithExamples,
}

/// Classification verdict; always produced
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub needs_multi_step: bool,
    pub pattern: Option<QuestionPattern>,
}

const INTERROGATIVES: &[&str] = &["what", "how", "why", "when", "where", "which", "who"];

/// Stateless question classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct QuestionClassifier;

impl QuestionClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a question; never fails
    pub fn classify(&self, question: &str) -> Classification {
        let lower = question.trim().to_lowercase();

        let pattern = if Self::is_multi_part(&lower) {
            Some(QuestionPattern::MultiPart)
        } else if Self::is_comparative(&lower) {
            Some(QuestionPattern::Comparative)
        } else if Self::is_causal(&lower) {
            Some(QuestionPattern::Causal)
        } else if Self::is_procedural(&lower) {
            Some(QuestionPattern::Procedural)
        } else if Self::is_definitional_with_examples(&lower) {
            Some(QuestionPattern::DefinitionalWithExamples)
        } else {
            None
        };

        Classification {
            needs_multi_step: pattern.is_some(),
            pattern,
        }
    }

    fn is_multi_part(question: &str) -> bool {
        // More than one question mark is the strongest signal.
        if question.matches('?').count() > 1 {
            return true;
        }

        // Two interrogative words joined by a connective.
        let interrogative_count = question
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| INTERROGATIVES.contains(w))
            .count();
        let has_connective = question.contains(" and ")
            || question.contains(" as well as ")
            || question.contains("; ");
        if interrogative_count >= 2 && has_connective {
            return true;
        }

        // Long multi-clause questions tend to hide several asks.
        question.matches(", ").count() >= 2 && question.split_whitespace().count() > 25
    }

    fn is_comparative(question: &str) -> bool {
        question.contains(" vs ")
            || question.contains(" versus ")
            || question.contains("compare")
            || question.contains("difference between")
            || question.contains("better than")
            || question.contains("similarities")
    }

    fn is_causal(question: &str) -> bool {
        question.starts_with("why")
            || question.contains("cause of")
            || question.contains("causes")
            || question.contains("lead to")
            || question.contains("leads to")
            || question.contains("result in")
            || question.contains("effect of")
            || question.contains("impact of")
    }

    fn is_procedural(question: &str) -> bool {
        question.starts_with("how to")
            || question.starts_with("how do")
            || question.starts_with("how can")
            || question.contains("step by step")
            || question.contains("steps to")
            || question.contains("process of")
            || question.contains("procedure for")
    }

    fn is_definitional_with_examples(question: &str) -> bool {
        let definitional = question.starts_with("what is")
            || question.starts_with("what are")
            || question.starts_with("define")
            || question.contains("meaning of");
        let wants_examples = question.contains("example")
            || question.contains("such as")
            || question.contains("for instance");
        definitional && wants_examples
    }
}
