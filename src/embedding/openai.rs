use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client as OpenAIClient};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error};

use super::Embedder;
use crate::config::Settings;
use crate::error::{FlywheelError, Result};
use crate::TARGET_LLM_REQUEST;

/// Per-request budget for the embedding API.
pub const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for any OpenAI-compatible `/embeddings` endpoint. Holds one HTTP client that
/// every request reuses.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: OpenAIClient<OpenAIConfig>,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_base: &str, api_key: &str, model: &str, dimension: usize) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(EMBEDDING_TIMEOUT)
            .build()?;
        let config = OpenAIConfig::new()
            .with_api_base(api_base.trim_end_matches('/'))
            .with_api_key(api_key);

        Ok(OpenAiEmbedder {
            client: OpenAIClient::with_config(config).with_http_client(http_client),
            model: model.to_string(),
            dimension,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            &settings.embedding_api_url,
            &settings.embedding_api_key,
            &settings.embedding_model,
            settings.embedding_dimension,
        )
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(FlywheelError::Validation(
                "cannot embed empty text".to_string(),
            ));
        }

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(text)
            .build()?;

        debug!(target: TARGET_LLM_REQUEST, "Requesting embedding ({} chars) from {}", text.len(), self.model);

        let response = match timeout(EMBEDDING_TIMEOUT, self.client.embeddings().create(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!(target: TARGET_LLM_REQUEST, "Embedding request failed: {}", e);
                return Err(e.into());
            }
            Err(_) => {
                error!(target: TARGET_LLM_REQUEST, "Embedding request timed out after {:?}", EMBEDDING_TIMEOUT);
                return Err(FlywheelError::Upstream(format!(
                    "embedding request timed out after {:?}",
                    EMBEDDING_TIMEOUT
                )));
            }
        };

        response
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .filter(|embedding| !embedding.is_empty())
            .ok_or(FlywheelError::EmptyResponse)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_embed_against_compatible_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/embeddings")
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "object": "list",
                    "data": [{"object": "embedding", "index": 0, "embedding": [0.1, 0.2, 0.3]}],
                    "model": "test-embed",
                    "usage": {"prompt_tokens": 3, "total_tokens": 3}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let embedder = OpenAiEmbedder::new(&server.url(), "secret", "test-embed", 3).unwrap();
        let vector = embedder.embed("selection on beak depth").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_text_is_rejected_without_request() {
        let embedder = OpenAiEmbedder::new("http://127.0.0.1:9", "k", "m", 3).unwrap();
        let err = embedder.embed("   ").await.unwrap_err();
        assert!(matches!(err, FlywheelError::Validation(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_upstream() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/embeddings")
            .with_status(500)
            .with_body(r#"{"error":{"message":"boom","type":"server_error","param":null,"code":null}}"#)
            .expect_at_least(1)
            .create_async()
            .await;

        let embedder = OpenAiEmbedder::new(&server.url(), "k", "m", 3).unwrap();
        let err = embedder.embed("text").await.unwrap_err();
        assert!(matches!(err, FlywheelError::Upstream(_)));
    }
}
