//! OpenAI 兼容 API 客户端（本地 Key 路由）
//!
//! 通过 async_openai 调用可配置 base_url 的 OpenAI 兼容端点；Key 每次调用时从凭据存储读取，
//! 因此 /config/openai 更新后无需重建客户端。

use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::config::LlmSection;
use crate::core::keystore::KeyStore;
use crate::llm::traits::{CompletionProvider, CompletionRequest, ProviderError};

/// 本地 Key 客户端：持有端点配置与凭据存储
pub struct OpenAiClient {
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    keys: Arc<KeyStore>,
}

impl OpenAiClient {
    pub fn new(section: &LlmSection, keys: Arc<KeyStore>) -> Self {
        Self {
            base_url: section.base_url.clone(),
            model: section.model.clone(),
            temperature: section.temperature,
            max_tokens: section.max_tokens,
            timeout: Duration::from_secs(section.timeout_secs),
            keys,
        }
    }

    fn to_openai_messages(
        request: &CompletionRequest,
    ) -> Result<Vec<ChatCompletionRequestMessage>, ProviderError> {
        let build_err = |e: async_openai::error::OpenAIError| ProviderError::Transport(e.to_string());
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system.clone())
                    .build()
                    .map_err(build_err)?,
            ));
        }
        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.prompt.clone())
                .build()
                .map_err(build_err)?,
        ));
        Ok(messages)
    }
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let api_key = self
            .keys
            .local_key()
            .ok_or_else(|| ProviderError::Transport("no local OPENAI_API_KEY configured".into()))?;
        let config = OpenAIConfig::new()
            .with_api_base(&self.base_url)
            .with_api_key(api_key);
        let client = Client::with_config(config);

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::to_openai_messages(request)?)
            .temperature(self.temperature)
            .max_completion_tokens(self.max_tokens)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, client.chat().create(chat_request))
            .await
            .map_err(|_| ProviderError::Transport(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ProviderError::Empty);
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_fails_without_network() {
        let client = OpenAiClient::new(&LlmSection::default(), Arc::new(KeyStore::in_memory()));
        let err = client
            .complete(&CompletionRequest::new("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
    }

    #[test]
    fn system_message_is_optional() {
        let plain = OpenAiClient::to_openai_messages(&CompletionRequest::new("a")).unwrap();
        assert_eq!(plain.len(), 1);
        let with_system = OpenAiClient::to_openai_messages(
            &CompletionRequest::new("a").with_system("you write code"),
        )
        .unwrap();
        assert_eq!(with_system.len(), 2);
    }
}
