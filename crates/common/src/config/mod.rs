//! Configuration management for Evidentia services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Generation provider configuration
    pub llm: LlmConfig,

    /// Retrieval backend configuration
    pub retrieval: RetrievalConfig,

    /// Redis configuration (response cache)
    pub redis: RedisConfig,

    /// Reasoning pipeline configuration
    pub reasoning: ReasoningConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Generation provider: openai, mock
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// API key for the generation service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries for recoverable generation failures
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum output tokens per generation call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Search service endpoint (None enables the static in-memory retriever)
    pub endpoint: Option<String>,

    /// Evidence items to request per retrieval call
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum relevance score to keep an evidence item
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// Request timeout in seconds
    #[serde(default = "default_retrieval_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL (None disables the response cache)
    pub url: Option<String>,

    /// Default TTL in seconds
    #[serde(default = "default_redis_ttl")]
    pub default_ttl_secs: u64,

    /// Key prefix for namespacing
    #[serde(default = "default_redis_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReasoningConfig {
    /// Whether multi-step reasoning is available at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Default strategy: zero_shot, decomposition, iterative, tree_of_thought
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Default maximum reasoning steps per request
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Per-step timeout in seconds
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    /// Overall per-request reasoning deadline in seconds
    #[serde(default = "default_deadline")]
    pub request_deadline_secs: u64,

    /// Concurrency bound for parallel decomposition
    #[serde(default = "default_parallel_limit")]
    pub parallel_limit: usize,

    /// Token budget for assembled evidence context
    #[serde(default = "default_token_budget")]
    pub context_token_budget: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 60 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_llm_provider() -> String { "openai".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_llm_timeout() -> u64 { 30 }
fn default_llm_retries() -> u32 { 3 }
fn default_temperature() -> f32 { 0.2 }
fn default_max_tokens() -> usize { 800 }
fn default_top_k() -> usize { 8 }
fn default_min_score() -> f32 { 0.3 }
fn default_retrieval_timeout() -> u64 { 10 }
fn default_redis_ttl() -> u64 { 300 }
fn default_redis_prefix() -> String { "evidentia".to_string() }
fn default_strategy() -> String { "decomposition".to_string() }
fn default_max_steps() -> usize { 5 }
fn default_step_timeout() -> u64 { 10 }
fn default_deadline() -> u64 { 45 }
fn default_parallel_limit() -> usize { 4 }
fn default_token_budget() -> usize { 4000 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "evidentia".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl ReasoningConfig {
    /// Per-step timeout as Duration
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    /// Per-request reasoning deadline as Duration
    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
            },
            llm: LlmConfig {
                provider: default_llm_provider(),
                api_key: None,
                api_base: None,
                model: default_llm_model(),
                timeout_secs: default_llm_timeout(),
                max_retries: default_llm_retries(),
                temperature: default_temperature(),
                max_tokens: default_max_tokens(),
            },
            retrieval: RetrievalConfig {
                endpoint: None,
                top_k: default_top_k(),
                min_score: default_min_score(),
                timeout_secs: default_retrieval_timeout(),
            },
            redis: RedisConfig {
                url: None,
                default_ttl_secs: default_redis_ttl(),
                key_prefix: default_redis_prefix(),
            },
            reasoning: ReasoningConfig {
                enabled: default_enabled(),
                strategy: default_strategy(),
                max_steps: default_max_steps(),
                step_timeout_secs: default_step_timeout(),
                request_deadline_secs: default_deadline(),
                parallel_limit: default_parallel_limit(),
                context_token_budget: default_token_budget(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                metrics_port: default_metrics_port(),
                service_name: default_service_name(),
            },
            rate_limit: RateLimitConfig {
                requests_per_second: default_rate_limit(),
                burst: default_burst(),
                enabled: default_enabled(),
            },
        }
    }
}
