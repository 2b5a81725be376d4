//! 补全提供方抽象
//!
//! 中继、本地 Key 直连、Mock 都实现 CompletionProvider：给一个请求，返回一段文本。
//! 不做重试：下游失败原样返回给调用方。

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// 单轮补全请求
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// 下游调用错误；出现任何一种都表示调用未被确认，不计配额
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("http {status}: {body}")]
    Status { status: u16, body: String },

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("empty completion")]
    Empty,
}

/// 补全提供方 trait
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// 用于日志与结果中的路由标记
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;
}

/// 从 OpenAI chat completions 形状中取出 `choices[0].message.content`
pub(crate) fn extract_chat_content(body: &serde_json::Value) -> Result<String, ProviderError> {
    let content = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| ProviderError::Decode("missing choices[0].message.content".into()))?;
    if content.trim().is_empty() {
        return Err(ProviderError::Empty);
    }
    Ok(content.to_string())
}
