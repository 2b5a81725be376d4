//! 阶段上下文与阶段结果
//!
//! Context 只追加：阶段名 -> StageResult，记录后不可修改。
//! 每个阶段只能通过 StageInputs 看到自己声明的依赖的输出。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::StageError;
use crate::core::task::Task;
use crate::core::workspace::StageDir;

/// 依赖失败时跳过的原因码
pub const SKIPPED_DUE_TO_DEPENDENCY: &str = "skipped_due_to_dependency";

/// 阶段结果：成功 / 失败 / 因依赖跳过
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageResult {
    Success {
        payload: Map<String, Value>,
        files: Vec<PathBuf>,
    },
    Failed {
        reason: String,
        message: String,
    },
    Skipped {
        reason: String,
        /// 未成功的依赖
        blocked_by: Vec<String>,
    },
}

impl StageResult {
    pub fn failed(err: &StageError) -> Self {
        StageResult::Failed {
            reason: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn skipped(blocked_by: Vec<String>) -> Self {
        StageResult::Skipped {
            reason: SKIPPED_DUE_TO_DEPENDENCY.to_string(),
            blocked_by,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Success { .. })
    }

    pub fn status(&self) -> &'static str {
        match self {
            StageResult::Success { .. } => "success",
            StageResult::Failed { .. } => "failed",
            StageResult::Skipped { .. } => "skipped",
        }
    }

    pub fn payload(&self) -> Option<&Map<String, Value>> {
        match self {
            StageResult::Success { payload, .. } => Some(payload),
            _ => None,
        }
    }

    pub fn files(&self) -> &[PathBuf] {
        match self {
            StageResult::Success { files, .. } => files,
            _ => &[],
        }
    }
}

/// 阶段成功时的产出
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub payload: Map<String, Value>,
    pub files: Vec<PathBuf>,
}

impl StageOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    pub fn file(mut self, path: PathBuf) -> Self {
        self.files.push(path);
        self
    }
}

impl From<StageOutput> for StageResult {
    fn from(out: StageOutput) -> Self {
        StageResult::Success {
            payload: out.payload,
            files: out.files,
        }
    }
}

/// 只追加的阶段上下文，保持记录顺序
#[derive(Debug, Clone, Default)]
pub struct Context {
    entries: Vec<(String, StageResult)>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一个阶段结果；同名已存在时保留第一次的记录并返回 false
    pub fn record(&mut self, stage: &str, result: StageResult) -> bool {
        if self.get(stage).is_some() {
            tracing::warn!(stage, "stage result already recorded; ignoring");
            return false;
        }
        self.entries.push((stage.to_string(), result));
        true
    }

    pub fn get(&self, stage: &str) -> Option<&StageResult> {
        self.entries
            .iter()
            .find(|(name, _)| name == stage)
            .map(|(_, result)| result)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StageResult)> {
        self.entries.iter().map(|(n, r)| (n.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 阶段名 -> 结果
    pub fn to_map(&self) -> BTreeMap<String, StageResult> {
        self.entries.iter().cloned().collect()
    }

    /// 只包含声明依赖的视图
    pub fn inputs_for(&self, dependencies: &[&str]) -> StageInputs {
        let entries = dependencies
            .iter()
            .filter_map(|dep| self.get(dep).map(|r| (dep.to_string(), r.clone())))
            .collect();
        StageInputs { entries }
    }
}

/// 某阶段可见的依赖输出
#[derive(Debug, Clone, Default)]
pub struct StageInputs {
    entries: BTreeMap<String, StageResult>,
}

impl StageInputs {
    pub fn get(&self, stage: &str) -> Option<&StageResult> {
        self.entries.get(stage)
    }

    /// 取依赖的成功 payload，不存在或非成功时报 MissingInput
    pub fn payload(&self, stage: &str) -> Result<&Map<String, Value>, StageError> {
        self.entries
            .get(stage)
            .and_then(StageResult::payload)
            .ok_or_else(|| StageError::MissingInput(stage.to_string()))
    }

    /// 取依赖 payload 中的字符串字段
    pub fn str_field(&self, stage: &str, key: &str) -> Result<&str, StageError> {
        self.payload(stage)?
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| StageError::MissingInput(format!("{stage}.{key}")))
    }
}

/// 传给 Agent::run 的全部输入：任务、依赖输出、本阶段子目录
#[derive(Debug, Clone)]
pub struct StageContext {
    pub task: Arc<Task>,
    pub inputs: StageInputs,
    pub dir: StageDir,
}
