//! 阶段依赖图
//!
//! 使用邻接表和入度表实现 DAG 拓扑排序（Kahn）。入度同为 0 的阶段按注册顺序出队，
//! 同一组阶段每次都得到同一顺序。

use std::collections::{HashMap, VecDeque};

use crate::core::error::PipelineError;

/// 阶段依赖图
#[derive(Debug)]
pub struct StageGraph {
    /// 注册顺序
    order: Vec<String>,
    /// 邻接表：阶段名 -> 依赖该阶段的阶段列表
    adjacency: HashMap<String, Vec<String>>,
    /// 入度表：阶段名 -> 依赖数
    in_degree: HashMap<String, usize>,
}

impl StageGraph {
    /// 由 (阶段名, 依赖列表) 构建；依赖不存在或重名立即报错
    pub fn new<I, N, D>(stages: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = (N, D)>,
        N: AsRef<str>,
        D: IntoIterator,
        D::Item: AsRef<str>,
    {
        let stages: Vec<(String, Vec<String>)> = stages
            .into_iter()
            .map(|(name, deps)| {
                (
                    name.as_ref().to_string(),
                    deps.into_iter().map(|d| d.as_ref().to_string()).collect(),
                )
            })
            .collect();

        let mut order = Vec::with_capacity(stages.len());
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        let mut in_degree: HashMap<String, usize> = HashMap::new();

        for (name, _) in &stages {
            if in_degree.insert(name.clone(), 0).is_some() {
                return Err(PipelineError::DuplicateStage(name.clone()));
            }
            adjacency.insert(name.clone(), Vec::new());
            order.push(name.clone());
        }

        for (name, deps) in &stages {
            for dep in deps {
                let dependents = adjacency.get_mut(dep.as_str()).ok_or_else(|| {
                    PipelineError::UnknownDependency {
                        stage: name.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                dependents.push(name.clone());
                *in_degree.entry(name.clone()).or_insert(0) += 1;
            }
        }

        Ok(Self {
            order,
            adjacency,
            in_degree,
        })
    }

    /// 拓扑序；存在环时返回 CyclicDependency，列出未能排出的阶段
    pub fn topological_order(&self) -> Result<Vec<String>, PipelineError> {
        let mut in_degree = self.in_degree.clone();
        let position: HashMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut ready: VecDeque<&str> = self
            .order
            .iter()
            .filter(|name| in_degree.get(name.as_str()) == Some(&0))
            .map(String::as_str)
            .collect();
        let mut sorted = Vec::with_capacity(self.order.len());

        while let Some(name) = ready.pop_front() {
            sorted.push(name.to_string());
            let mut released = Vec::new();
            if let Some(dependents) = self.adjacency.get(name) {
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            released.push(dependent.as_str());
                        }
                    }
                }
            }
            released.sort_by_key(|n| position.get(n).copied().unwrap_or(usize::MAX));
            ready.extend(released);
        }

        if sorted.len() != self.order.len() {
            let stuck = self
                .order
                .iter()
                .filter(|name| !sorted.contains(name))
                .cloned()
                .collect();
            return Err(PipelineError::CyclicDependency(stuck));
        }
        Ok(sorted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(stages: &[(&str, &[&str])]) -> Result<Vec<String>, PipelineError> {
        StageGraph::new(stages.iter().map(|(n, d)| (*n, d.iter().copied())))?
            .topological_order()
    }

    #[test]
    fn dependencies_come_first() {
        let sorted = order(&[
            ("patcher", &["codegen", "tester"]),
            ("tester", &["codegen"]),
            ("codegen", &["engineer"]),
            ("engineer", &[]),
        ])
        .unwrap();
        assert_eq!(sorted, vec!["engineer", "codegen", "tester", "patcher"]);
    }

    #[test]
    fn ties_keep_registration_order() {
        let sorted = order(&[("b", &[]), ("a", &[]), ("c", &["a", "b"])]).unwrap();
        assert_eq!(sorted, vec!["b", "a", "c"]);
    }

    #[test]
    fn cycle_is_reported() {
        let err = order(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"]), ("d", &[])]).unwrap_err();
        match err {
            PipelineError::CyclicDependency(stuck) => assert_eq!(stuck, vec!["a", "b", "c"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        assert!(matches!(
            order(&[("a", &["a"])]),
            Err(PipelineError::CyclicDependency(_))
        ));
    }

    #[test]
    fn unknown_and_duplicate_stages() {
        assert!(matches!(
            order(&[("a", &["ghost"])]),
            Err(PipelineError::UnknownDependency { .. })
        ));
        assert!(matches!(
            order(&[("a", &[]), ("a", &[])]),
            Err(PipelineError::DuplicateStage(_))
        ));
    }
}
