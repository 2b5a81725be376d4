//! 阶段注册表
//!
//! 所有阶段实现 Agent trait（name / dependencies / subdir / run），由 AgentRegistry 按名注册与查找。
//! 按名替换已有阶段时保留其注册位置，编排器无需改动即可换实现。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::agents::context::{StageContext, StageOutput};
use crate::core::error::StageError;
use crate::core::workspace::Subdir;

/// 阶段 trait
#[async_trait]
pub trait Agent: Send + Sync {
    /// 阶段名（Context 与最终产物中的键）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 上游阶段名
    fn dependencies(&self) -> &[&'static str] {
        &[]
    }

    /// 本阶段唯一可写的子目录
    fn subdir(&self) -> Subdir;

    async fn run(&self, ctx: StageContext) -> Result<StageOutput, StageError>;
}

/// 阶段注册表：按名称存储 Arc<dyn Agent>，并记住注册顺序
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
    order: Vec<String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: impl Agent + 'static) {
        self.register_arc(Arc::new(agent));
    }

    pub fn register_arc(&mut self, agent: Arc<dyn Agent>) {
        let name = agent.name().to_string();
        if self.agents.insert(name.clone(), agent).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    /// 按注册顺序
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 按注册顺序返回 (name, description, dependencies)
    pub fn describe(&self) -> Vec<(String, String, Vec<String>)> {
        self.order
            .iter()
            .filter_map(|name| self.agents.get(name))
            .map(|a| {
                (
                    a.name().to_string(),
                    a.description().to_string(),
                    a.dependencies().iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, &'static str);

    #[async_trait]
    impl Agent for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            self.1
        }
        fn subdir(&self) -> Subdir {
            Subdir::Engineering
        }
        async fn run(&self, _ctx: StageContext) -> Result<StageOutput, StageError> {
            Ok(StageOutput::new())
        }
    }

    #[test]
    fn lookup_is_by_name() {
        let mut registry = AgentRegistry::new();
        registry.register(Named("b", "second"));
        registry.register(Named("a", "first"));
        assert_eq!(registry.get("a").unwrap().description(), "first");
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), ["b", "a"]);
    }

    #[test]
    fn replacing_keeps_position() {
        let mut registry = AgentRegistry::new();
        registry.register(Named("a", "old"));
        registry.register(Named("b", "other"));
        registry.register(Named("a", "new"));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), ["a", "b"]);
        assert_eq!(registry.get("a").unwrap().description(), "new");
    }
}
