//! Retrieval abstractions
//!
//! The pipeline consumes evidence through the `Retriever` trait; vector
//! stores, keyword indexes, and their fusion live behind a collaborator
//! service. Two implementations ship here:
//! - `HttpRetriever` calls a configured search service endpoint
//! - `StaticRetriever` scores an in-memory corpus, for tests and local runs

mod rerank;

pub use rerank::{Reranker, RerankerConfig};

use crate::context::types::DocumentContext;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Trait for evidence retrieval
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve up to `top_k` evidence items for a query
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<DocumentContext>>;
}

/// HTTP client for a search service collaborator
pub struct HttpRetriever {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct SearchServiceRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Deserialize)]
struct SearchServiceResponse {
    results: Vec<SearchServiceItem>,
}

#[derive(Deserialize)]
struct SearchServiceItem {
    source_id: String,
    text: String,
    #[serde(default)]
    document_name: Option<String>,
    #[serde(default)]
    page_number: Option<u32>,
    #[serde(default)]
    chunk_index: Option<u32>,
    score: f32,
}

impl HttpRetriever {
    pub fn new(endpoint: String, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<DocumentContext>> {
        let started = std::time::Instant::now();

        let response = self
            .client
            .post(&self.endpoint)
            .json(&SearchServiceRequest { query, top_k })
            .send()
            .await
            .map_err(|e| AppError::Retrieval {
                message: format!("Search request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            crate::metrics::record_retrieval(started.elapsed().as_secs_f64(), 0, false);
            return Err(AppError::Retrieval {
                message: format!("Search service error {}: {}", status, body),
            });
        }

        let parsed: SearchServiceResponse =
            response.json().await.map_err(|e| AppError::Retrieval {
                message: format!("Failed to parse search response: {}", e),
            })?;

        let documents: Vec<DocumentContext> = parsed
            .results
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                let mut doc =
                    DocumentContext::new(item.text, item.source_id, item.score, (i + 1) as u32);
                if let Some(name) = item.document_name {
                    doc = doc.with_document_name(name);
                }
                if let Some(page) = item.page_number {
                    doc = doc.with_page_number(page);
                }
                if let Some(index) = item.chunk_index {
                    doc = doc.with_chunk_index(index);
                }
                doc
            })
            .collect();

        crate::metrics::record_retrieval(started.elapsed().as_secs_f64(), documents.len(), true);
        Ok(documents)
    }
}

/// In-memory retriever scoring documents by query-term overlap
///
/// Used by tests and keyless local development; scoring follows the same
/// coverage measure the reranker uses.
pub struct StaticRetriever {
    documents: Vec<DocumentContext>,
}

impl StaticRetriever {
    pub fn new(documents: Vec<DocumentContext>) -> Self {
        Self { documents }
    }

    /// Build a corpus from (source_id, document_name, text) triples
    pub fn from_texts(entries: &[(&str, &str, &str)]) -> Self {
        let documents = entries
            .iter()
            .enumerate()
            .map(|(i, (source_id, name, text))| {
                DocumentContext::new(*text, *source_id, 0.5, (i + 1) as u32)
                    .with_document_name(*name)
            })
            .collect();
        Self { documents }
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<DocumentContext>> {
        let query_words: HashSet<String> = query
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .map(str::to_string)
            .collect();

        let mut scored: Vec<(f32, &DocumentContext)> = self
            .documents
            .iter()
            .map(|doc| {
                let text = doc.text().to_lowercase();
                let hits = query_words.iter().filter(|w| text.contains(w.as_str())).count();
                let score = if query_words.is_empty() {
                    0.0
                } else {
                    hits as f32 / query_words.len() as f32
                };
                (score, doc)
            })
            .filter(|(score, _)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(top_k)
            .enumerate()
            .map(|(i, (score, doc))| doc.rescored(score, (i + 1) as u32))
            .collect())
    }
}

/// Create a retriever based on configuration
pub fn create_retriever(config: &crate::config::RetrievalConfig) -> Result<Arc<dyn Retriever>> {
    match &config.endpoint {
        Some(endpoint) => Ok(Arc::new(HttpRetriever::new(
            endpoint.clone(),
            config.timeout_secs,
        )?)),
        None => {
            tracing::warn!("No retrieval endpoint configured, using empty static retriever");
            Ok(Arc::new(StaticRetriever::new(vec![])))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_retriever_ranks_by_overlap() {
        let retriever = StaticRetriever::from_texts(&[
            ("s-1", "Attention", "Attention mechanisms weight token relevance."),
            ("s-2", "Unrelated", "Databases store rows in pages."),
        ]);

        let results = retriever.retrieve("attention relevance weighting", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_id(), "s-1");
        assert_eq!(results[0].retrieval_rank(), 1);
    }

    #[tokio::test]
    async fn test_static_retriever_respects_top_k() {
        let retriever = StaticRetriever::from_texts(&[
            ("s-1", "A", "query terms appear here: indexing search"),
            ("s-2", "B", "query terms appear here too: indexing search"),
            ("s-3", "C", "query terms appear here as well: indexing search"),
        ]);

        let results = retriever.retrieve("indexing search", 2).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_corpus_returns_no_documents() {
        let retriever = StaticRetriever::new(vec![]);
        let results = retriever.retrieve("anything", 5).await.unwrap();
        assert!(results.is_empty());
    }
}
