//! 阶段层：Agent trait 与注册表、只追加的上下文、四个内置阶段
//!
//! 默认流水线：engineer → codegen → tester → patcher（依赖由各阶段声明，编排器自行排序）。

pub mod codegen;
pub mod context;
pub mod engineer;
pub mod patcher;
pub mod registry;
pub mod tester;

use std::sync::Arc;

pub use codegen::CodegenAgent;
pub use context::{Context, StageContext, StageInputs, StageOutput, StageResult, SKIPPED_DUE_TO_DEPENDENCY};
pub use engineer::EngineerAgent;
pub use patcher::PatcherAgent;
pub use registry::{Agent, AgentRegistry};
pub use tester::TesterAgent;

use crate::llm::CompletionGateway;

/// 注册四个内置阶段
pub fn default_registry(gateway: Arc<CompletionGateway>) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    registry.register(EngineerAgent);
    registry.register(CodegenAgent::new(gateway));
    registry.register(TesterAgent);
    registry.register(PatcherAgent);
    registry
}
