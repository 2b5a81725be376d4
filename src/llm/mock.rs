//! Mock 补全提供方（用于测试，无需网络）
//!
//! 固定回复，可设置前 N 次调用失败；记录调用次数。

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::llm::traits::{CompletionProvider, CompletionRequest, ProviderError};

/// Mock 提供方
#[derive(Debug, Default)]
pub struct MockProvider {
    reply: String,
    fail_first: usize,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            ..Self::default()
        }
    }

    /// 前 `n` 次调用返回 503，之后正常回复
    pub fn failing_then_replying(n: usize, reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            fail_first: n,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Err(ProviderError::Status {
                status: 503,
                body: "mock unavailable".into(),
            });
        }
        Ok(self.reply.clone())
    }
}
