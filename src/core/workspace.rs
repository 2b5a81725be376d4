//! 工作区分配
//!
//! 每个任务独占 `<output_root>/<slug>/`，下设 engineering / codegen / tests / patches / final 五个子目录。
//! 同一描述重算得到同一 slug 时直接复用已有目录；创建对每个子目录都是幂等的。
//! 阶段只拿到自己子目录的 StageDir，文件名不得包含路径分隔符或 `..`。
//! 相同描述的并发任务共用一个工作区，由按 slug 的租约串行执行。

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::core::error::WorkspaceError;
use crate::core::task::TaskSlug;

/// 五个固定子目录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subdir {
    Engineering,
    Codegen,
    Tests,
    Patches,
    Final,
}

impl Subdir {
    pub const ALL: [Subdir; 5] = [
        Subdir::Engineering,
        Subdir::Codegen,
        Subdir::Tests,
        Subdir::Patches,
        Subdir::Final,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Subdir::Engineering => "engineering",
            Subdir::Codegen => "codegen",
            Subdir::Tests => "tests",
            Subdir::Patches => "patches",
            Subdir::Final => "final",
        }
    }
}

impl fmt::Display for Subdir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一个任务的工作区句柄
#[derive(Debug, Clone)]
pub struct Workspace {
    slug: TaskSlug,
    root: PathBuf,
}

impl Workspace {
    pub fn slug(&self) -> &TaskSlug {
        &self.slug
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, subdir: Subdir) -> PathBuf {
        self.root.join(subdir.as_str())
    }

    /// 只暴露一个子目录的受限句柄，交给阶段使用
    pub fn stage_dir(&self, subdir: Subdir) -> StageDir {
        StageDir {
            subdir,
            path: self.dir(subdir),
        }
    }
}

/// 阶段可写的子目录
#[derive(Debug, Clone)]
pub struct StageDir {
    subdir: Subdir,
    path: PathBuf,
}

impl StageDir {
    pub fn subdir(&self) -> Subdir {
        self.subdir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 检查文件名只落在本子目录内
    pub fn resolve(&self, file_name: &str) -> Result<PathBuf, WorkspaceError> {
        let escapes = file_name.is_empty()
            || file_name.contains('/')
            || file_name.contains('\\')
            || file_name == "."
            || file_name.contains("..")
            || Path::new(file_name).is_absolute();
        if escapes {
            return Err(WorkspaceError::PathEscape(format!(
                "{}/{}",
                self.subdir, file_name
            )));
        }
        Ok(self.path.join(file_name))
    }

    pub async fn write_file(
        &self,
        file_name: &str,
        contents: impl AsRef<[u8]>,
    ) -> Result<PathBuf, WorkspaceError> {
        let path = self.resolve(file_name)?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(|source| WorkspaceError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    pub async fn write_json<T: Serialize>(
        &self,
        file_name: &str,
        value: &T,
    ) -> Result<PathBuf, WorkspaceError> {
        let body = serde_json::to_vec_pretty(value)?;
        self.write_file(file_name, body).await
    }
}

type SlugLocks = Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>;

/// 一个 slug 的独占租约；析构时释放，无人等待时顺带移除锁表项
#[derive(Debug)]
pub struct SlugLease {
    slug: String,
    locks: SlugLocks,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for SlugLease {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // 锁表一份 + 本租约一份
        if locks
            .get(&self.slug)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            locks.remove(&self.slug);
        }
    }
}

/// 工作区分配器：绑定输出根目录；克隆共享同一张 slug 锁表
#[derive(Debug, Clone)]
pub struct WorkspaceAllocator {
    output_root: PathBuf,
    locks: SlugLocks,
}

impl WorkspaceAllocator {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            locks: SlugLocks::default(),
        }
    }

    /// 等待并取得某个 slug 的独占租约；不同 slug 互不阻塞
    pub async fn lease(&self, slug: &TaskSlug) -> SlugLease {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(slug.as_str().to_string()).or_default())
        };
        let guard = lock.lock_owned().await;
        SlugLease {
            slug: slug.as_str().to_string(),
            locks: Arc::clone(&self.locks),
            _guard: guard,
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// 推导 slug 并创建目录树；根目录已存在时复用
    pub async fn allocate(&self, description: &str) -> Result<Workspace, WorkspaceError> {
        let slug = TaskSlug::from_description(description);
        let root = self.output_root.join(slug.as_str());

        for subdir in Subdir::ALL {
            let path = root.join(subdir.as_str());
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|source| WorkspaceError::Create { path, source })?;
        }

        tracing::debug!(slug = %slug, root = %root.display(), "workspace ready");
        Ok(Workspace { slug, root })
    }
}
