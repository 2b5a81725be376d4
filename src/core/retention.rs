//! 输出目录清理
//!
//! 先删除超过保留天数的任务目录，再在总占用超过上限时按修改时间从旧到新删除。
//! 含 `.keep` 文件的目录永远保留；`global/` 与隐藏目录不算任务目录。
//! 每次清理在 `global/cleanup.log` 追加一行 JSON。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::config::RetentionSection;

const KEEP_MARKER: &str = ".keep";
const GLOBAL_DIR: &str = "global";

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CleanupReport {
    pub deleted: Vec<String>,
    pub kept: usize,
    pub disk_bytes: u64,
}

struct TaskDir {
    path: PathBuf,
    name: String,
    modified: SystemTime,
    bytes: u64,
    pinned: bool,
}

fn dir_size(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

fn task_dirs(output_root: &Path) -> std::io::Result<Vec<TaskDir>> {
    let mut dirs = Vec::new();
    for entry in walkdir::WalkDir::new(output_root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name == GLOBAL_DIR {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        let path = entry.path().to_path_buf();
        dirs.push(TaskDir {
            bytes: dir_size(&path),
            pinned: path.join(KEEP_MARKER).exists(),
            path,
            name,
            modified,
        });
    }
    Ok(dirs)
}

fn remove(dir: &TaskDir, report: &mut CleanupReport) -> std::io::Result<()> {
    std::fs::remove_dir_all(&dir.path)?;
    tracing::info!(dir = %dir.name, bytes = dir.bytes, "task directory removed");
    report.deleted.push(dir.name.clone());
    Ok(())
}

/// 按保留策略清理；天数与上限都为 0 时只统计不删除
pub fn cleanup(output_root: &Path, policy: &RetentionSection) -> std::io::Result<CleanupReport> {
    if !output_root.is_dir() {
        return Ok(CleanupReport::default());
    }
    let mut dirs = task_dirs(output_root)?;
    let mut report = CleanupReport::default();

    if policy.days > 0 {
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(policy.days * 86_400))
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let (old, young): (Vec<_>, Vec<_>) = dirs
            .into_iter()
            .partition(|d| !d.pinned && d.modified < cutoff);
        for dir in &old {
            remove(dir, &mut report)?;
        }
        dirs = young;
    }

    if policy.max_disk_mb > 0 {
        let cap = policy.max_disk_mb * 1024 * 1024;
        let mut total: u64 = dirs.iter().map(|d| d.bytes).sum();
        dirs.sort_by_key(|d| d.modified);
        let mut survivors = Vec::new();
        for dir in dirs {
            if total > cap && !dir.pinned {
                total -= dir.bytes;
                remove(&dir, &mut report)?;
            } else {
                survivors.push(dir);
            }
        }
        dirs = survivors;
    }

    report.kept = dirs.len();
    report.disk_bytes = dirs.iter().map(|d| d.bytes).sum();
    append_log(output_root, &report)?;
    Ok(report)
}

fn append_log(output_root: &Path, report: &CleanupReport) -> std::io::Result<()> {
    let global = output_root.join(GLOBAL_DIR);
    std::fs::create_dir_all(&global)?;
    let line = json!({
        "ts": Utc::now().to_rfc3339(),
        "deleted": report.deleted,
        "kept": report.kept,
        "disk_bytes": report.disk_bytes,
    });
    let mut log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(global.join("cleanup.log"))?;
    writeln!(log, "{}", line)
}
