//! Second-pass reranking of retrieved evidence
//!
//! Blends the retriever's score with a lexical coverage estimate, then
//! normalizes scores and reassigns ranks. Works with any retriever since
//! score distributions are normalized before blending.

use crate::context::types::DocumentContext;
use std::collections::HashSet;

/// Reranker parameters
#[derive(Debug, Clone)]
pub struct RerankerConfig {
    /// Weight for the retriever's score
    pub retrieval_weight: f32,

    /// Weight for query-term coverage
    pub lexical_weight: f32,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            retrieval_weight: 0.6,
            lexical_weight: 0.4,
        }
    }
}

/// Pure reranker
pub struct Reranker {
    config: RerankerConfig,
}

impl Reranker {
    pub fn new(config: RerankerConfig) -> Self {
        Self { config }
    }

    /// Rerank evidence for a query, returning at most `limit` items with
    /// normalized scores and fresh ranks.
    pub fn rerank(
        &self,
        query: &str,
        documents: Vec<DocumentContext>,
        limit: usize,
    ) -> Vec<DocumentContext> {
        if documents.is_empty() {
            return documents;
        }

        let query_words: HashSet<String> = query
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .map(str::to_string)
            .collect();

        let mut scored: Vec<(f32, DocumentContext)> = documents
            .into_iter()
            .map(|doc| {
                let coverage = Self::coverage(&query_words, doc.text());
                let blended = self.config.retrieval_weight * doc.relevance_score()
                    + self.config.lexical_weight * coverage;
                (blended, doc)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        let max_score = scored.first().map(|(s, _)| *s).unwrap_or(0.0);

        scored
            .into_iter()
            .enumerate()
            .map(|(i, (score, doc))| {
                let normalized = if max_score > 0.0 { score / max_score } else { 0.0 };
                doc.rescored(normalized, (i + 1) as u32)
            })
            .collect()
    }

    /// Fraction of query words present in the text
    fn coverage(query_words: &HashSet<String>, text: &str) -> f32 {
        if query_words.is_empty() {
            return 0.0;
        }
        let text = text.to_lowercase();
        let hits = query_words.iter().filter(|w| text.contains(w.as_str())).count();
        hits as f32 / query_words.len() as f32
    }
}

impl Default for Reranker {
    fn default() -> Self {
        Self::new(RerankerConfig::default())
    }
}
