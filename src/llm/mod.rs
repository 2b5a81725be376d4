//! LLM 层：补全提供方抽象、Demo 中继、本地 Key 直连、配额网关与 Mock

pub mod gateway;
pub mod mock;
pub mod openai;
pub mod relay;
pub mod traits;

pub use gateway::{Completion, CompletionGateway, GatewayError};
pub use mock::MockProvider;
pub use openai::OpenAiClient;
pub use relay::RelayClient;
pub use traits::{CompletionProvider, CompletionRequest, ProviderError};
