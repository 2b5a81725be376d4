//! Demo 中继客户端
//!
//! 中继由维护者托管并在服务端持有提供方 Key；请求体是 OpenAI chat completions 形状，
//! 可选共享密钥通过 `X-Orbit-Demo` 头发送。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::llm::traits::{extract_chat_content, CompletionProvider, CompletionRequest, ProviderError};

const RELAY_MODEL: &str = "gpt-4o-mini";
const RELAY_SYSTEM: &str = "Orbit Demo Relay";
const RELAY_TEMPERATURE: f32 = 0.7;
const RELAY_MAX_TOKENS: u32 = 256;
const RELAY_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEMO_AUTH_HEADER: &str = "X-Orbit-Demo";

/// 中继客户端
pub struct RelayClient {
    http: reqwest::Client,
    url: String,
    auth: Option<String>,
}

impl RelayClient {
    pub fn new(url: impl Into<String>, auth: Option<String>) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(RELAY_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            url: url.into(),
            auth: auth.filter(|s| !s.trim().is_empty()),
        })
    }

    fn payload(request: &CompletionRequest) -> serde_json::Value {
        let system = request.system.as_deref().unwrap_or(RELAY_SYSTEM);
        json!({
            "model": RELAY_MODEL,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": request.prompt},
            ],
            "temperature": RELAY_TEMPERATURE,
            "max_tokens": RELAY_MAX_TOKENS,
            "stream": false,
        })
    }
}

#[async_trait]
impl CompletionProvider for RelayClient {
    fn name(&self) -> &str {
        "relay"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let mut builder = self
            .http
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&Self::payload(request));
        if let Some(secret) = &self.auth {
            builder = builder.header(DEMO_AUTH_HEADER, secret);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: body.chars().take(120).collect(),
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        extract_chat_content(&body)
    }
}
