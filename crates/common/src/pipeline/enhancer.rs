//! Query Enhancement - normalization and term expansion
//!
//! Provides:
//! - Whitespace and case normalization
//! - Abbreviation expansion for retrieval recall

use std::collections::HashMap;

/// Enhanced query produced from the raw question
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancedQuery {
    /// Trimmed, whitespace-collapsed question
    pub normalized: String,

    /// Expansion terms added for retrieval
    pub expanded_terms: Vec<String>,

    /// Query string sent to the retriever
    pub retrieval_query: String,
}

/// Query enhancer configuration
#[derive(Debug, Clone)]
pub struct EnhancerConfig {
    /// Enable abbreviation expansion
    pub enable_expansion: bool,

    /// Maximum expansion terms
    pub max_expansions: usize,
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            enable_expansion: true,
            max_expansions: 5,
        }
    }
}

/// Pure query enhancer
pub struct QueryEnhancer {
    config: EnhancerConfig,
    expansions: HashMap<String, Vec<String>>,
}

impl QueryEnhancer {
    pub fn new(config: EnhancerConfig) -> Self {
        Self {
            config,
            expansions: Self::load_default_expansions(),
        }
    }

    /// Enhance a question for retrieval
    pub fn enhance(&self, question: &str) -> EnhancedQuery {
        let normalized = question.split_whitespace().collect::<Vec<_>>().join(" ");

        let expanded_terms = if self.config.enable_expansion {
            self.expand(&normalized)
        } else {
            vec![]
        };

        let retrieval_query = if expanded_terms.is_empty() {
            normalized.clone()
        } else {
            format!("{} {}", normalized, expanded_terms.join(" "))
        };

        EnhancedQuery {
            normalized,
            expanded_terms,
            retrieval_query,
        }
    }

    fn expand(&self, question: &str) -> Vec<String> {
        let mut terms = Vec::new();
        for word in question.split_whitespace() {
            let key: String = word
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            if let Some(expansions) = self.expansions.get(&key) {
                for term in expansions {
                    if !terms.contains(term) {
                        terms.push(term.clone());
                    }
                }
            }
        }
        terms.truncate(self.config.max_expansions);
        terms
    }

    fn load_default_expansions() -> HashMap<String, Vec<String>> {
        let mut expansions = HashMap::new();

        expansions.insert("ml".to_string(), vec!["machine learning".to_string()]);
        expansions.insert("nlp".to_string(), vec!["natural language processing".to_string()]);
        expansions.insert("llm".to_string(), vec!["large language model".to_string()]);
        expansions.insert("rag".to_string(), vec!["retrieval augmented generation".to_string()]);
        expansions.insert("dl".to_string(), vec!["deep learning".to_string()]);
        expansions.insert("rl".to_string(), vec!["reinforcement learning".to_string()]);
        expansions.insert("cv".to_string(), vec!["computer vision".to_string()]);
        expansions.insert("kg".to_string(), vec!["knowledge graph".to_string()]);

        expansions
    }
}

impl Default for QueryEnhancer {
    fn default() -> Self {
        Self::new(EnhancerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_whitespace() {
        let enhancer = QueryEnhancer::default();
        let enhanced = enhancer.enhance("  What   is\tattention?  ");
        assert_eq!(enhanced.normalized, "What is attention?");
    }

    #[test]
    fn test_expands_abbreviations() {
        let enhancer = QueryEnhancer::default();
        let enhanced = enhancer.enhance("How does RAG use an LLM?");
        assert!(enhanced
            .expanded_terms
            .contains(&"retrieval augmented generation".to_string()));
        assert!(enhanced
            .expanded_terms
            .contains(&"large language model".to_string()));
        assert!(enhanced.retrieval_query.starts_with("How does RAG use an LLM?"));
    }

    #[test]
    fn test_expansion_can_be_disabled() {
        let enhancer = QueryEnhancer::new(EnhancerConfig {
            enable_expansion: false,
            max_expansions: 5,
        });
        let enhanced = enhancer.enhance("How does RAG work?");
        assert!(enhanced.expanded_terms.is_empty());
        assert_eq!(enhanced.retrieval_query, enhanced.normalized);
    }
}
