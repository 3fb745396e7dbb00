//! Context Manager - bounds evidence to a token budget
//!
//! Provides:
//! - Source-level deduplication
//! - Relevance floor filtering
//! - Token budget packing with tail trimming
//! - Rank reassignment

use super::types::{DocumentContext, DocumentContextList};

/// Context manager configuration
#[derive(Debug, Clone)]
pub struct ContextManagerConfig {
    /// Maximum token budget for assembled evidence
    pub max_tokens: usize,

    /// Maximum evidence items to keep
    pub max_documents: usize,

    /// Minimum relevance score to include an item
    pub min_relevance: f32,
}

impl Default for ContextManagerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            max_documents: 8,
            min_relevance: 0.3,
        }
    }
}

/// Minimum tokens worth trimming a document down to
const MIN_TRIMMED_TOKENS: usize = 125;

/// Pure, CPU-bound evidence assembly; never suspends
pub struct ContextManager {
    config: ContextManagerConfig,
}

impl ContextManager {
    pub fn new(config: ContextManagerConfig) -> Self {
        Self { config }
    }

    /// Assemble retrieved evidence into a bounded, deduplicated list.
    ///
    /// Items are filtered by the relevance floor, deduplicated by source id
    /// (best score wins), ordered by relevance, and packed under the token
    /// budget. The last item is trimmed to fit when enough budget remains,
    /// otherwise dropped. Ranks are reassigned to match the final order.
    pub fn assemble(&self, documents: Vec<DocumentContext>) -> DocumentContextList {
        let mut best: Vec<DocumentContext> = Vec::with_capacity(documents.len());

        for doc in documents {
            if doc.relevance_score() < self.config.min_relevance {
                continue;
            }
            match best.iter_mut().find(|d| d.source_id() == doc.source_id()) {
                Some(existing) => {
                    if doc.relevance_score() > existing.relevance_score() {
                        *existing = doc;
                    }
                }
                None => best.push(doc),
            }
        }

        best.sort_by(|a, b| {
            b.relevance_score()
                .partial_cmp(&a.relevance_score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.retrieval_rank().cmp(&b.retrieval_rank()))
        });
        best.truncate(self.config.max_documents);

        let mut packed = Vec::with_capacity(best.len());
        let mut total_tokens = 0usize;

        for doc in best {
            let tokens = doc.estimated_tokens();
            if total_tokens + tokens > self.config.max_tokens {
                let remaining = self.config.max_tokens.saturating_sub(total_tokens);
                if remaining >= MIN_TRIMMED_TOKENS {
                    let trimmed = doc.truncated(remaining * 4);
                    total_tokens += trimmed.estimated_tokens();
                    packed.push(trimmed);
                }
                break;
            }
            total_tokens += tokens;
            packed.push(doc);
        }

        let ranked = packed
            .into_iter()
            .enumerate()
            .map(|(i, doc)| {
                let score = doc.relevance_score();
                doc.rescored(score, (i + 1) as u32)
            })
            .collect();

        DocumentContextList::from_ranked(ranked)
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(ContextManagerConfig::default())
    }
}
