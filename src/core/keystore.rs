//! 本地凭据存储
//!
//! 一个扁平的 key-value TOML 文件，目前只存 `OPENAI_API_KEY`。
//! 启动时加载，更新时先写临时文件再 rename；每次调用尝试前由闸门查询是否存在本地 Key。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::core::error::KeyStoreError;

pub const OPENAI_KEY: &str = "OPENAI_API_KEY";

/// 凭据存储；值在内存中缓存一份
#[derive(Debug)]
pub struct KeyStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl KeyStore {
    /// 读取已有文件；文件不存在视为空存储
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, KeyStoreError> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => toml::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(KeyStoreError::Read { path, source }),
        };
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    /// 只在内存中的存储（不落盘的测试与嵌入场景）
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            values: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .ok()
            .and_then(|v| v.get(key).cloned())
            .filter(|v| !v.trim().is_empty())
    }

    pub fn local_key(&self) -> Option<String> {
        self.get(OPENAI_KEY)
    }

    pub fn local_key_present(&self) -> bool {
        self.local_key().is_some()
    }

    /// 校验 `sk-` 前缀后保存
    pub fn set_local_key(&self, key: &str) -> Result<(), KeyStoreError> {
        let key = key.trim();
        if !key.starts_with("sk-") {
            return Err(KeyStoreError::InvalidKey);
        }
        self.set(OPENAI_KEY, key)
    }

    /// 只在内存中补一个值（已有值时不覆盖），不写文件；用于配置或环境变量提供的 Key
    pub fn seed(&self, key: &str, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        let mut values = self
            .values
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        values
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }

    /// 先把新内容写盘，成功后才替换内存中的值；写失败时存储保持原样
    pub fn set(&self, key: &str, value: &str) -> Result<(), KeyStoreError> {
        let mut values = self
            .values
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = values.clone();
        next.insert(key.to_string(), value.to_string());
        self.persist(&next)?;
        *values = next;
        Ok(())
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), KeyStoreError> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        let body = toml::to_string(values)?;
        let write_err = |source| KeyStoreError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, body).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;
        tracing::info!(path = %self.path.display(), "credential store updated");
        Ok(())
    }
}
