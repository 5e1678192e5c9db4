//! Chat-completion client with retries and strict JSON decoding.

pub mod ollama;
pub mod openai;
pub mod parse;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use crate::config::{LlmProvider, Settings};
use crate::error::{FlywheelError, Result};
use crate::paper::{AnalysisResult, TokenUsage};
use crate::prompt;
use crate::TARGET_LLM_REQUEST;

pub const ANALYSIS_TEMPERATURE: f32 = 0.3;
pub const ANALYSIS_MAX_TOKENS: u32 = 2000;
pub const REPORT_TEMPERATURE: f32 = 0.5;
pub const REPORT_MAX_TOKENS: u32 = 4000;

/// Upper bound on a single chat call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// `backoff` plus a random extra of up to a quarter of it.
fn with_jitter(backoff: Duration) -> Duration {
    let spread = backoff.as_millis() as u64 / 4;
    if spread == 0 {
        return backoff;
    }
    backoff + Duration::from_millis(rand::rng().random_range(0..=spread))
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatReply {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

/// One chat-completion provider.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatReply>;

    fn model(&self) -> &str;
}

/// Anything that can turn a title and abstract into an analysis.
#[async_trait]
pub trait PaperAnalyzer: Send + Sync {
    async fn analyze_paper(&self, title: &str, abstract_text: &str) -> Result<AnalysisResult>;
}

#[derive(Clone)]
pub struct LlmClient {
    backend: Arc<dyn ChatBackend>,
    max_retries: u32,
    retry_delay: Duration,
}

impl LlmClient {
    /// `max_retries` is the total number of attempts per call (at least one).
    pub fn new(backend: Arc<dyn ChatBackend>, max_retries: u32, retry_delay: Duration) -> Self {
        LlmClient {
            backend,
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let backend: Arc<dyn ChatBackend> = match settings.llm_provider {
            LlmProvider::OpenAI => Arc::new(OpenAiBackend::new(
                &settings.openai_base_url,
                &settings.openai_api_key,
                &settings.llm_model,
            )),
            LlmProvider::Ollama => Arc::new(OllamaBackend::new(
                &settings.ollama_host,
                settings.ollama_port,
                &settings.llm_model,
            )),
        };
        info!(target: TARGET_LLM_REQUEST, "Using {:?} chat backend with model {}", settings.llm_provider, settings.llm_model);
        Ok(Self::new(
            backend,
            settings.llm_max_retries,
            settings.llm_retry_delay,
        ))
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    /// Sends `request`, retrying transient failures with exponential backoff starting at
    /// `retry_delay`. Non-retryable errors are returned at once.
    pub async fn complete_with_retry(&self, request: &ChatRequest) -> Result<ChatReply> {
        let mut backoff = self.retry_delay;
        let mut last_error = String::new();

        for attempt in 1..=self.max_retries {
            debug!(target: TARGET_LLM_REQUEST, "Sending chat request to {} (attempt {}/{})", self.backend.model(), attempt, self.max_retries);

            let outcome = match timeout(REQUEST_TIMEOUT, self.backend.complete(request)).await {
                Ok(Ok(reply)) if reply.content.trim().is_empty() => Err(FlywheelError::EmptyResponse),
                Ok(result) => result,
                Err(_) => Err(FlywheelError::Upstream(format!(
                    "chat request timed out after {:?}",
                    REQUEST_TIMEOUT
                ))),
            };

            match outcome {
                Ok(reply) => {
                    debug!(target: TARGET_LLM_REQUEST, "Chat response received ({} chars)", reply.content.len());
                    return Ok(reply);
                }
                Err(e) if e.is_retryable() => {
                    warn!(target: TARGET_LLM_REQUEST, "Chat request failed (attempt {}/{}): {}", attempt, self.max_retries, e);
                    last_error = e.to_string();
                }
                Err(e) => {
                    error!(target: TARGET_LLM_REQUEST, "Chat request failed permanently: {}", e);
                    return Err(e);
                }
            }

            if attempt < self.max_retries {
                let pause = with_jitter(backoff);
                debug!(target: TARGET_LLM_REQUEST, "Backing off for {:?} before retry", pause);
                sleep(pause).await;
                backoff *= 2;
            }
        }

        error!(target: TARGET_LLM_REQUEST, "Chat request failed after {} attempts", self.max_retries);
        Err(FlywheelError::ApiExhausted {
            attempts: self.max_retries,
            last_error,
        })
    }

    /// Asks for the daily report document and returns it as a JSON object.
    pub async fn generate_report(&self, user_prompt: &str) -> Result<Map<String, Value>> {
        let request = ChatRequest {
            system: prompt::report_system_prompt(),
            user: user_prompt.to_string(),
            temperature: REPORT_TEMPERATURE,
            max_tokens: REPORT_MAX_TOKENS,
        };
        let reply = self.complete_with_retry(&request).await?;
        parse::extract_json_object(&reply.content)
    }
}

#[async_trait]
impl PaperAnalyzer for LlmClient {
    async fn analyze_paper(&self, title: &str, abstract_text: &str) -> Result<AnalysisResult> {
        let request = ChatRequest {
            system: prompt::analysis_system_prompt(),
            user: prompt::analysis_prompt(title, abstract_text),
            temperature: ANALYSIS_TEMPERATURE,
            max_tokens: ANALYSIS_MAX_TOKENS,
        };
        let reply = self.complete_with_retry(&request).await?;
        parse::parse_analysis(&reply.content, reply.usage)
    }
}
