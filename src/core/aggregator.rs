//! 结果汇总
//!
//! 把 Context 中所有阶段结果（成功、失败、跳过）连同工作区路径、耗时、打包报告、需求追踪
//! 合并为一个 FinalArtifact，写到 `final/<stem>.json`。写入是任务的最后一步，先写临时文件再 rename。

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agents::context::{Context, StageResult};
use crate::core::error::WorkspaceError;
use crate::core::task::{Task, TaskSlug};
use crate::core::workspace::{Subdir, Workspace};
use crate::packaging::PackagingReport;

pub const UPGRADE_HINT: &str =
    "Local model servers, retries and provider fallbacks are available in extended editions.";

/// 生成文件 -> 需求 id
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Traceability {
    /// 文件名包含需求描述中长词（>4 字符）时建立映射
    pub requirement_map: BTreeMap<String, Vec<String>>,
    /// 文件名包含描述中长词（>3 字符）
    pub keyword_map: BTreeMap<String, Vec<String>>,
}

/// 最终产物
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalArtifact {
    pub task_id: Uuid,
    pub slug: TaskSlug,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
    /// 所有阶段都成功
    pub success: bool,
    /// 执行顺序
    pub stage_order: Vec<String>,
    pub stages: BTreeMap<String, StageResult>,
    pub workspace_root: PathBuf,
    pub artifact_path: PathBuf,
    pub generated_files: Vec<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packaging: Option<PackagingReport>,
    pub traceability: Traceability,
    /// 纯提示信息，消费方解析时不应依赖
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_hint: Option<String>,
}

impl FinalArtifact {
    pub fn failed_stages(&self) -> impl Iterator<Item = (&str, &StageResult)> {
        self.stages
            .iter()
            .filter(|(_, r)| matches!(r, StageResult::Failed { .. }))
            .map(|(n, r)| (n.as_str(), r))
    }

    /// 因配额耗尽失败的阶段记录的消息（含「2/2」用量）
    pub fn quota_failure(&self) -> Option<&str> {
        self.failed_stages().find_map(|(_, r)| match r {
            StageResult::Failed { reason, message } if reason == "quota_exceeded" => {
                Some(message.as_str())
            }
            _ => None,
        })
    }

    pub fn quota_exhausted(&self) -> bool {
        self.quota_failure().is_some()
    }
}

/// 汇总时需要的元数据
#[derive(Debug, Clone)]
pub struct FinalizeMeta {
    pub started_at: DateTime<Utc>,
    pub packaging: Option<PackagingReport>,
    pub show_upgrade_hint: bool,
}

/// 需求追踪：从 engineer payload 取需求，没有时按句拆描述
pub fn build_traceability(task: &Task, context: &Context, files: &[PathBuf]) -> Traceability {
    let mut requirements: Vec<(String, String)> = context
        .get("engineer")
        .and_then(StageResult::payload)
        .and_then(|p| p.get("requirements"))
        .and_then(|r| r.as_array())
        .map(|reqs| {
            reqs.iter()
                .filter_map(|r| {
                    Some((
                        r.get("id")?.as_str()?.to_string(),
                        r.get("description")?.as_str()?.to_lowercase(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default();
    if requirements.is_empty() {
        requirements = task
            .description
            .split('.')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(i, s)| (format!("implicit_{}", i + 1), s.to_lowercase()))
            .collect();
    }

    let description = task.description.to_lowercase();
    let mut desc_words: Vec<&str> = description.split_whitespace().filter(|w| w.len() > 3).collect();
    desc_words.sort();
    desc_words.dedup();

    let mut trace = Traceability::default();
    for file in files {
        let key = file.display().to_string();
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let mut hits: Vec<String> = requirements
            .iter()
            .filter(|(_, text)| text.split_whitespace().any(|t| t.len() > 4 && name.contains(t)))
            .map(|(id, _)| id.clone())
            .collect();
        hits.sort();
        hits.dedup();
        if !hits.is_empty() {
            trace.requirement_map.insert(key.clone(), hits);
        }

        let words: Vec<String> = desc_words
            .iter()
            .filter(|w| name.contains(*w))
            .map(|w| w.to_string())
            .collect();
        trace.keyword_map.insert(key, words);
    }
    trace
}

/// 合并并写出最终产物
pub async fn finalize(
    task: &Task,
    context: &Context,
    workspace: &Workspace,
    meta: FinalizeMeta,
) -> Result<FinalArtifact, WorkspaceError> {
    let final_dir = workspace.stage_dir(Subdir::Final);
    let file_name = format!("{}.json", workspace.slug().stem());
    let artifact_path = final_dir.resolve(&file_name)?;

    let mut generated_files: Vec<PathBuf> = context
        .iter()
        .flat_map(|(_, r)| r.files().iter().cloned())
        .collect();
    if let Some(exe) = meta.packaging.as_ref().and_then(|p| p.exe.clone()) {
        generated_files.push(exe);
    }
    let traceability = build_traceability(task, context, &generated_files);

    let finished_at = Utc::now();
    let duration_ms = (finished_at - meta.started_at).num_milliseconds().max(0) as u64;

    let artifact = FinalArtifact {
        task_id: task.id,
        slug: workspace.slug().clone(),
        description: task.description.clone(),
        type_hint: task.type_hint.clone(),
        success: context.iter().all(|(_, r)| r.is_success()),
        stage_order: context.iter().map(|(n, _)| n.to_string()).collect(),
        stages: context.to_map(),
        workspace_root: workspace.root().to_path_buf(),
        artifact_path: artifact_path.clone(),
        generated_files,
        started_at: meta.started_at,
        finished_at,
        duration_ms,
        packaging: meta.packaging,
        traceability,
        upgrade_hint: meta.show_upgrade_hint.then(|| UPGRADE_HINT.to_string()),
    };

    let body = serde_json::to_vec_pretty(&artifact)?;
    let tmp = final_dir.resolve(&format!("{}.{}.json.tmp", workspace.slug().stem(), task.id))?;
    tokio::fs::write(&tmp, body)
        .await
        .map_err(|source| WorkspaceError::Write {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, &artifact_path)
        .await
        .map_err(|source| WorkspaceError::Write {
            path: artifact_path.clone(),
            source,
        })?;

    tracing::info!(slug = %workspace.slug(), path = %artifact_path.display(), success = artifact.success, "final artifact written");
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::context::StageOutput;
    use crate::core::error::{QuotaExceeded, StageError};
    use crate::core::workspace::WorkspaceAllocator;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn traceability_links_files_to_requirements() {
        let task = Task::new("Build a calculator. Support history");
        let mut ctx = Context::new();
        ctx.record(
            "engineer",
            StageOutput::new()
                .with(
                    "requirements",
                    json!([
                        {"id": "req_1", "description": "Build a calculator"},
                        {"id": "req_2", "description": "Support history"},
                    ]),
                )
                .into(),
        );
        let files = vec![PathBuf::from("/w/codegen/calculator.py"), PathBuf::from("/w/tests/report.json")];
        let trace = build_traceability(&task, &ctx, &files);

        assert_eq!(trace.requirement_map["/w/codegen/calculator.py"], vec!["req_1"]);
        assert!(!trace.requirement_map.contains_key("/w/tests/report.json"));
        // 描述按空白切词，句点保留在词尾
        assert_eq!(trace.keyword_map["/w/codegen/calculator.py"], vec!["calculator."]);
    }

    #[tokio::test]
    async fn finalize_keeps_every_stage_and_writes_file() {
        let dir = TempDir::new().unwrap();
        let task = Task::new("create a calculator");
        let ws = WorkspaceAllocator::new(dir.path())
            .allocate(&task.description)
            .await
            .unwrap();

        let mut ctx = Context::new();
        ctx.record("engineer", StageOutput::new().into());
        ctx.record(
            "codegen",
            StageResult::failed(&StageError::QuotaExceeded(QuotaExceeded { used: 2, pending: 0, cap: 2 })),
        );
        ctx.record("tester", StageResult::skipped(vec!["codegen".into()]));

        let artifact = finalize(
            &task,
            &ctx,
            &ws,
            FinalizeMeta {
                started_at: Utc::now(),
                packaging: None,
                show_upgrade_hint: false,
            },
        )
        .await
        .unwrap();

        assert!(!artifact.success);
        assert!(artifact.quota_exhausted());
        assert_eq!(
            artifact.quota_failure(),
            Some("Demo limit reached (2/2). Please add your OPENAI_API_KEY.")
        );
        assert_eq!(artifact.stage_order, vec!["engineer", "codegen", "tester"]);
        assert!(artifact.upgrade_hint.is_none());

        let path = ws.dir(Subdir::Final).join("create_a_calculator.json");
        assert_eq!(artifact.artifact_path, path);
        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["stages"]["tester"]["reason"], "skipped_due_to_dependency");
        assert_eq!(written["stages"]["codegen"]["reason"], "quota_exceeded");
        assert!(written.get("upgrade_hint").is_none());
        let leftover_tmp = std::fs::read_dir(ws.dir(Subdir::Final))
            .unwrap()
            .filter_map(Result::ok)
            .any(|e| e.file_name().to_string_lossy().ends_with(".tmp"));
        assert!(!leftover_tmp);
    }
}
