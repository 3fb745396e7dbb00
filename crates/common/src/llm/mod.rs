//! Generation service abstraction
//!
//! Provides a unified interface for text generation providers:
//! - OpenAI-compatible chat completion endpoints
//! - Mock generation for development and testing
//!
//! The pipeline consumes only the `Generator` contract; provider network
//! details never leak into reasoning code.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// A single generation request
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// System role text (optional)
    pub system: Option<String>,

    /// Fully rendered prompt
    pub prompt: String,

    /// Maximum output tokens
    pub max_tokens: usize,

    /// Sampling temperature
    pub temperature: f32,
}

impl GenerationRequest {
    /// Build a request with default sampling settings
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_tokens: 800,
            temperature: 0.2,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Result of a generation call
#[derive(Debug, Clone)]
pub struct Generation {
    /// Generated text
    pub text: String,

    /// Token usage for the call
    pub usage: TokenUsage,
}

/// Trait for text generation
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate text for a prompt
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible chat completion client
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl OpenAiGenerator {
    /// Create a new OpenAI-compatible generator
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| crate::DEFAULT_GENERATION_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            max_retries,
        })
    }

    /// Make request with retry
    async fn request_with_retry(&self, request: &GenerationRequest) -> Result<Generation> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // Exponential backoff
                let delay = Duration::from_millis(100 * (2_u64.pow(attempt)));
                tokio::time::sleep(delay).await;
            }

            match self.make_request(request).await {
                Ok(generation) => return Ok(generation),
                // 4xx responses other than 429 will not improve on retry
                Err(e) if !e.is_degradable() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "Generation request failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::Generation {
            message: "Unknown error after retries".to_string(),
        }))
    }

    async fn make_request(&self, request: &GenerationRequest) -> Result<Generation> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        let body = ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Generation {
                message: format!("Request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Auth and bad-request failures are provider-fatal; retrying
            // cannot fix them and the pipeline must not absorb them.
            if status.is_client_error() && status.as_u16() != 429 {
                return Err(AppError::Configuration {
                    message: format!(
                        "Generation provider rejected the request ({}): check api_key and model. {}",
                        status, body
                    ),
                });
            }
            return Err(AppError::Generation {
                message: format!("API error {}: {}", status, body),
            });
        }

        let chat: ChatResponse = response.json().await.map_err(|e| AppError::Generation {
            message: format!("Failed to parse response: {}", e),
        })?;

        let text = chat
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| AppError::Generation {
                message: "Empty response from provider".to_string(),
            })?;

        let usage = chat
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(Generation { text, usage })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        self.request_with_retry(request).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Mock generator for development and testing
///
/// Answers deterministically from the prompt text so pipeline behavior is
/// reproducible without an API key.
pub struct MockGenerator;

impl MockGenerator {
    fn question_in(prompt: &str) -> Option<&str> {
        let start = prompt.rfind("Question:")?;
        let rest = &prompt[start + "Question:".len()..];
        let line = rest.lines().find(|l| !l.trim().is_empty())?;
        Some(line.trim())
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        let text = match Self::question_in(&request.prompt) {
            Some(question) => format!(
                "The available documents do not fully answer \"{}\"; a generation provider must be configured for grounded answers.",
                question
            ),
            None => "The available documents do not contain enough information to answer.".to_string(),
        };

        let usage = TokenUsage {
            prompt_tokens: (request.prompt.len() / 4) as u32,
            completion_tokens: (text.len() / 4) as u32,
        };

        Ok(Generation { text, usage })
    }

    fn model_name(&self) -> &str {
        "mock-generation"
    }
}

/// Create a generator based on configuration
pub fn create_generator(config: &crate::config::LlmConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "llm.api_key is required for the openai provider; set APP__LLM__API_KEY or switch llm.provider to 'mock'".to_string(),
            })?;
            Ok(Arc::new(OpenAiGenerator::new(
                key,
                Some(config.model.clone()),
                config.api_base.clone(),
                config.timeout_secs,
                config.max_retries,
            )?))
        }
        "mock" => Ok(Arc::new(MockGenerator)),
        other => Err(AppError::Configuration {
            message: format!(
                "Unknown generation provider '{}'; expected 'openai' or 'mock'",
                other
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_generator_echoes_question() {
        let generator = MockGenerator;
        let request = GenerationRequest::new("## Documents\n[1] text\n\nQuestion:\nWhat is attention?\n\nAnswer:");
        let generation = generator.generate(&request).await.unwrap();
        assert!(generation.text.contains("What is attention?"));
        assert!(generation.usage.completion_tokens > 0);
    }

    #[test]
    fn test_create_generator_requires_key() {
        let config = crate::config::AppConfig::default().llm;
        assert!(matches!(
            create_generator(&config),
            Err(AppError::Configuration { .. })
        ));
    }

    #[test]
    fn test_create_generator_unknown_provider() {
        let mut config = crate::config::AppConfig::default().llm;
        config.provider = "banana".to_string();
        assert!(create_generator(&config).is_err());
    }
}
