use async_trait::async_trait;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::options::GenerationOptions;
use ollama_rs::Ollama;
use tracing::debug;

use super::{ChatBackend, ChatReply, ChatRequest};
use crate::error::{FlywheelError, Result};
use crate::TARGET_LLM_REQUEST;

/// A local Ollama server. Token usage is not reported.
#[derive(Clone, Debug)]
pub struct OllamaBackend {
    ollama: Ollama,
    model: String,
}

impl OllamaBackend {
    pub fn new(host: &str, port: u16, model: &str) -> Self {
        OllamaBackend {
            ollama: Ollama::new(host.to_string(), port),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatReply> {
        let mut generation = GenerationRequest::new(self.model.clone(), request.user.clone());
        generation.system = Some(request.system.clone());
        generation.options = Some(
            GenerationOptions::default()
                .temperature(request.temperature)
                .num_predict(request.max_tokens as i32),
        );

        let response = self
            .ollama
            .generate(generation)
            .await
            .map_err(|e| FlywheelError::Upstream(format!("ollama: {}", e)))?;

        debug!(target: TARGET_LLM_REQUEST, "Ollama response received ({} chars)", response.response.len());
        Ok(ChatReply {
            content: response.response,
            usage: None,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
