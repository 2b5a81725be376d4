//! 全局任务清单 `<output_root>/manifest.json`
//!
//! 每完成一个任务按 slug 去重写入一条；并发任务通过互斥锁串行化读改写。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::core::aggregator::FinalArtifact;
use crate::core::error::WorkspaceError;

const DESCRIPTION_LIMIT: usize = 240;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestEntry {
    pub slug: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub success: bool,
    pub summary: PathBuf,
    pub generated_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exe: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestFile {
    pub tasks: Vec<ManifestEntry>,
    pub total_tasks: usize,
}

pub struct Manifest {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Manifest {
    pub fn new(output_root: &Path) -> Self {
        Self {
            path: output_root.join("manifest.json"),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取清单；文件缺失或损坏时视为空
    pub async fn load(&self) -> ManifestFile {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(path = %self.path.display(), error = %e, "manifest unreadable, starting fresh");
                ManifestFile::default()
            }),
            Err(_) => ManifestFile::default(),
        }
    }

    /// 插入或替换同 slug 的条目
    pub async fn record(&self, artifact: &FinalArtifact) -> Result<(), WorkspaceError> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await;

        let entry = ManifestEntry {
            slug: artifact.slug.to_string(),
            description: artifact.description.chars().take(DESCRIPTION_LIMIT).collect(),
            created_at: artifact.finished_at,
            success: artifact.success,
            summary: artifact.artifact_path.clone(),
            generated_count: artifact.generated_files.len(),
            exe: artifact.packaging.as_ref().and_then(|p| p.exe.clone()),
        };
        file.tasks.retain(|t| t.slug != entry.slug);
        file.tasks.push(entry);
        file.total_tasks = file.tasks.len();

        let body = serde_json::to_vec_pretty(&file)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| WorkspaceError::Create {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|source| WorkspaceError::Write {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| WorkspaceError::Write {
                path: self.path.clone(),
                source,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::context::{Context, StageOutput};
    use crate::core::aggregator::{finalize, FinalizeMeta};
    use crate::core::task::Task;
    use crate::core::workspace::WorkspaceAllocator;
    use tempfile::TempDir;

    async fn artifact(root: &Path, description: &str) -> FinalArtifact {
        let task = Task::new(description);
        let ws = WorkspaceAllocator::new(root).allocate(description).await.unwrap();
        let mut ctx = Context::new();
        ctx.record("engineer", StageOutput::new().into());
        finalize(
            &task,
            &ctx,
            &ws,
            FinalizeMeta {
                started_at: Utc::now(),
                packaging: None,
                show_upgrade_hint: true,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn record_dedups_by_slug() {
        let dir = TempDir::new().unwrap();
        let manifest = Manifest::new(dir.path());

        let a = artifact(dir.path(), "create a calculator").await;
        manifest.record(&a).await.unwrap();
        manifest.record(&a).await.unwrap();
        let b = artifact(dir.path(), &"x".repeat(500)).await;
        manifest.record(&b).await.unwrap();

        let file = manifest.load().await;
        assert_eq!(file.total_tasks, 2);
        assert_eq!(file.tasks[1].description.len(), DESCRIPTION_LIMIT);
        assert!(file.tasks[0].success);
    }

    #[tokio::test]
    async fn corrupt_manifest_is_replaced() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("manifest.json"), "{not json").unwrap();
        let manifest = Manifest::new(dir.path());
        assert_eq!(manifest.load().await.total_tasks, 0);

        let a = artifact(dir.path(), "hello").await;
        manifest.record(&a).await.unwrap();
        assert_eq!(manifest.load().await.total_tasks, 1);
    }
}
