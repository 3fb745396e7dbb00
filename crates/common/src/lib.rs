//! Evidentia Common Library
//!
//! Shared code for the Evidentia services including:
//! - Context value types and the reasoning chain
//! - The chain-of-thought pipeline (classifier, decomposer, reasoner, synthesizer)
//! - Retrieval and generation client abstractions
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod context;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod retrieval;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use llm::Generator;
pub use pipeline::{Orchestrator, SearchRequest, SearchResponse};
pub use retrieval::Retriever;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default generation model
pub const DEFAULT_GENERATION_MODEL: &str = "gpt-4o-mini";
