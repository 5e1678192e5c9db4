use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client as OpenAIClient,
};
use async_trait::async_trait;
use tracing::debug;

use super::{ChatBackend, ChatReply, ChatRequest};
use crate::error::{FlywheelError, Result};
use crate::paper::TokenUsage;
use crate::TARGET_LLM_REQUEST;

/// Any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone, Debug)]
pub struct OpenAiBackend {
    client: OpenAIClient<OpenAIConfig>,
    model: String,
}

impl OpenAiBackend {
    pub fn new(api_base: &str, api_key: &str, model: &str) -> Self {
        let config = OpenAIConfig::new()
            .with_api_base(api_base.trim_end_matches('/'))
            .with_api_key(api_key);
        OpenAiBackend {
            client: OpenAIClient::with_config(config),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatReply> {
        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(request.system.as_str())
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(request.user.as_str())
                    .build()?
                    .into(),
            ])
            .temperature(request.temperature)
            .max_tokens(request.max_tokens)
            .build()?;

        let response = self.client.chat().create(chat_request).await?;

        let usage = response.usage.as_ref().map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(FlywheelError::EmptyResponse)?;

        debug!(target: TARGET_LLM_REQUEST, "OpenAI usage: {:?}", usage);
        Ok(ChatReply { content, usage })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
