//! 会话内存储：按键保存任意 JSON 值，支持 save / recall / list / clear
//!
//! 只在进程内存中，不参与流水线，也不落盘；Supervisor 持有一份并在健康检查中探测。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

/// 一条记忆的元数据
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MemoryMeta {
    pub key: String,
    /// JSON 值类型：string / number / bool / array / object / null
    pub kind: &'static str,
    pub saved_at: DateTime<Utc>,
    /// 序列化后的字节数
    pub size: usize,
}

#[derive(Debug, Clone)]
struct MemoryItem {
    value: Value,
    meta: MemoryMeta,
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<BTreeMap<String, MemoryItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存（覆盖同名键）；空键返回 None
    pub async fn save(&self, key: &str, value: Value) -> Option<MemoryMeta> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        let meta = MemoryMeta {
            key: key.to_string(),
            kind: kind_of(&value),
            saved_at: Utc::now(),
            size: value.to_string().len(),
        };
        self.items.write().await.insert(
            key.to_string(),
            MemoryItem {
                value,
                meta: meta.clone(),
            },
        );
        Some(meta)
    }

    pub async fn recall(&self, key: &str) -> Option<(Value, MemoryMeta)> {
        self.items
            .read()
            .await
            .get(key.trim())
            .map(|item| (item.value.clone(), item.meta.clone()))
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.items.read().await.contains_key(key.trim())
    }

    /// 按键名排序
    pub async fn list(&self) -> Vec<MemoryMeta> {
        self.items
            .read()
            .await
            .values()
            .map(|item| item.meta.clone())
            .collect()
    }

    /// 指定键时只删该键，否则清空；返回删除条数
    pub async fn clear(&self, key: Option<&str>) -> usize {
        let mut items = self.items.write().await;
        match key {
            Some(key) => usize::from(items.remove(key.trim()).is_some()),
            None => {
                let n = items.len();
                items.clear();
                n
            }
        }
    }
}
