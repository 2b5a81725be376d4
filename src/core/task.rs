//! 任务与任务 slug
//!
//! Task 在请求入口创建后不再修改；TaskSlug 由描述确定性推导，用作工作区目录名。

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// 关键词前缀最多取的词数
const SLUG_MAX_WORDS: usize = 8;
/// 追加在末尾的摘要十六进制长度
const SLUG_HASH_LEN: usize = 8;
/// slug 总长度上限
const SLUG_MAX_LEN: usize = 56;
const SLUG_FALLBACK: &str = "general-task";

/// 一次用户请求：原始描述加可选类型提示
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub description: String,
    pub type_hint: Option<String>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            type_hint: None,
        }
    }

    pub fn with_type_hint(mut self, hint: impl Into<String>) -> Self {
        self.type_hint = Some(hint.into());
        self
    }

    pub fn slug(&self) -> TaskSlug {
        TaskSlug::from_description(&self.description)
    }
}

/// 工作区目录名：小写、连字符分隔、长度有界，同一描述总得到同一 slug
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskSlug(String);

impl TaskSlug {
    /// `<最多 8 个关键词>-<sha256 前 8 位>`
    pub fn from_description(description: &str) -> Self {
        let lowered = description.to_lowercase();
        let words: Vec<String> = lowered
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .take(SLUG_MAX_WORDS)
            .map(str::to_string)
            .collect();

        let prefix = if words.is_empty() {
            SLUG_FALLBACK.to_string()
        } else {
            words.join("-")
        };

        let digest = Sha256::digest(description.as_bytes());
        let hex: String = digest
            .iter()
            .take(SLUG_HASH_LEN / 2)
            .map(|b| format!("{:02x}", b))
            .collect();

        // 为分隔符与摘要留位，截断后去掉尾部连字符
        let budget = SLUG_MAX_LEN - SLUG_HASH_LEN - 1;
        let mut prefix: String = prefix.chars().take(budget).collect();
        while prefix.ends_with('-') {
            prefix.pop();
        }
        if prefix.is_empty() {
            prefix = SLUG_FALLBACK.to_string();
        }

        Self(format!("{}-{}", prefix, hex))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 关键词前缀的下划线形式，用作生成文件名（`create_a_calculator`）
    pub fn stem(&self) -> String {
        let prefix = self.0.rsplit_once('-').map_or(self.0.as_str(), |(p, _)| p);
        prefix.replace('-', "_")
    }
}

impl fmt::Display for TaskSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TaskSlug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
