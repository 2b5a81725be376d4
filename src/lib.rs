//! Orbit - 多阶段代码生成流水线
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 工作区、配额闸门、凭据、编排器、结果汇总、Supervisor
//! - **workflow**: 阶段依赖图与拓扑排序
//! - **agents**: 阶段 trait、注册表、上下文与内置阶段
//! - **llm**: 补全提供方（Demo 中继 / OpenAI 兼容 / Mock）与配额网关
//! - **linguist**: 任务描述解析
//! - **packaging**: 可执行文件打包
//! - **server**: HTTP 入口（feature `web`）

pub mod agents;
pub mod config;
pub mod core;
pub mod linguist;
pub mod llm;
pub mod observability;
pub mod packaging;
#[cfg(feature = "web")]
pub mod server;
pub mod workflow;

pub use crate::core::{FinalArtifact, Orchestrator, ProcessResponse, Supervisor, Task};
