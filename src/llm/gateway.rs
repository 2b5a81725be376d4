//! 补全网关：配额闸门 + 路由
//!
//! 每次调用：查询本地 Key → 闸门选路 → 调下游 → 成功才 commit 中继名额。
//! 中继失败时名额随 RelayPermit 析构归还；没有任何路由时返回 Unavailable，由阶段自行走模板。

use std::sync::Arc;

use thiserror::Error;

use crate::config::AppConfig;
use crate::core::error::QuotaExceeded;
use crate::core::keystore::KeyStore;
use crate::core::quota::{CredentialSource, QuotaGate, QuotaSnapshot, QuotaState};
use crate::llm::openai::OpenAiClient;
use crate::llm::relay::RelayClient;
use crate::llm::traits::{CompletionProvider, CompletionRequest, ProviderError};

/// 网关调用结果
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    /// relay / local_key
    pub route: &'static str,
    /// 走中继时为本次提交后的累计次数
    pub relay_call: Option<u32>,
}

#[derive(Error, Debug)]
pub enum GatewayError {
    /// 未配置中继也没有本地 Key
    #[error("no completion route configured")]
    Unavailable,

    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),

    #[error("{route} call failed: {source}")]
    Provider {
        route: &'static str,
        #[source]
        source: ProviderError,
    },
}

/// 补全网关
pub struct CompletionGateway {
    gate: QuotaGate,
    keys: Arc<KeyStore>,
    relay: Option<Arc<dyn CompletionProvider>>,
    direct: Arc<dyn CompletionProvider>,
}

impl CompletionGateway {
    pub fn new(
        state: Arc<QuotaState>,
        keys: Arc<KeyStore>,
        relay: Option<Arc<dyn CompletionProvider>>,
        direct: Arc<dyn CompletionProvider>,
    ) -> Self {
        let gate = QuotaGate::new(state, relay.is_some());
        Self {
            gate,
            keys,
            relay,
            direct,
        }
    }

    /// 按配置组装：demo 开启且有中继地址时挂上中继，直连客户端总是存在（无 Key 时不会被选中）
    pub fn from_config(
        cfg: &AppConfig,
        state: Arc<QuotaState>,
        keys: Arc<KeyStore>,
    ) -> Result<Self, ProviderError> {
        let relay = match cfg.demo.relay_endpoint() {
            Some(url) => {
                tracing::info!(relay = url, "demo relay enabled");
                Some(Arc::new(RelayClient::new(url, cfg.demo.relay_auth.clone())?)
                    as Arc<dyn CompletionProvider>)
            }
            None => None,
        };
        let direct = Arc::new(OpenAiClient::new(&cfg.llm, Arc::clone(&keys)));
        Ok(Self::new(state, keys, relay, direct))
    }

    pub fn quota(&self) -> QuotaSnapshot {
        self.gate.state().snapshot()
    }

    pub fn relay_configured(&self) -> bool {
        self.gate.relay_configured()
    }

    pub fn local_key_present(&self) -> bool {
        self.keys.local_key_present()
    }

    pub async fn complete(&self, request: &CompletionRequest) -> Result<Completion, GatewayError> {
        let source = self.gate.acquire_call(self.keys.local_key_present())?;
        tracing::debug!(route = source.label(), "completion route selected");

        match source {
            CredentialSource::LocalKey => {
                let text = self
                    .direct
                    .complete(request)
                    .await
                    .map_err(|source| GatewayError::Provider {
                        route: "local_key",
                        source,
                    })?;
                Ok(Completion {
                    text,
                    route: "local_key",
                    relay_call: None,
                })
            }
            CredentialSource::Relay(permit) => {
                let relay = self.relay.as_ref().ok_or(GatewayError::Unavailable)?;
                match relay.complete(request).await {
                    Ok(text) => {
                        let n = permit.commit();
                        tracing::info!(call = n, cap = crate::core::quota::QUOTA_CAP, "demo relay call consumed");
                        Ok(Completion {
                            text,
                            route: "relay",
                            relay_call: Some(n),
                        })
                    }
                    Err(source) => {
                        drop(permit);
                        tracing::warn!(error = %source, "demo relay call failed; quota not consumed");
                        Err(GatewayError::Provider {
                            route: "relay",
                            source,
                        })
                    }
                }
            }
            CredentialSource::None => Err(GatewayError::Unavailable),
        }
    }
}
