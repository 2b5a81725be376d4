//! 可执行文件打包（尽力而为的旁路）
//!
//! 编排器在核心阶段结束后检查描述中的打包意图；命中时调用 Packager，把结果或失败原因写成
//! `final/<stem>_exe_build.txt`。任何打包错误都不会让任务失败。

pub mod pyinstaller;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::PackagingError;

pub use pyinstaller::PyInstallerPackager;

/// 含空格的短语按子串匹配
const EXE_PHRASES: &[&str] = &[
    " build an executable",
    "executable",
    " .exe",
    " build exe",
    "make an exe",
    "windows binary",
    "create exe",
];
/// 按整词匹配
const EXE_TOKENS: &[&str] = &["exe", "executable"];

/// 描述是否请求打包（大小写不敏感）
pub fn wants_executable(description: &str) -> bool {
    let lowered = description.to_lowercase();
    EXE_PHRASES.iter().any(|p| lowered.contains(p))
        || lowered
            .split_whitespace()
            .any(|token| EXE_TOKENS.contains(&token))
}

/// 一次打包请求
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub script: PathBuf,
    pub stem: String,
    pub final_dir: PathBuf,
    /// GUI 程序（tkinter）不弹控制台
    pub windowed: bool,
}

impl BuildRequest {
    /// 构建专用目录 `final/_build_<stem>`
    pub fn build_root(&self) -> PathBuf {
        self.final_dir.join(format!("_build_{}", self.stem))
    }

    pub fn target_exe(&self) -> PathBuf {
        self.final_dir.join(format!("{}.exe", self.stem))
    }
}

/// 打包成功的产物
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub exe: PathBuf,
    pub log: PathBuf,
}

/// 打包能力
#[async_trait]
pub trait Packager: Send + Sync {
    fn name(&self) -> &str;

    /// 工具链是否可用
    async fn available(&self) -> bool;

    async fn build(&self, request: &BuildRequest) -> Result<BuildOutput, PackagingError>;
}

/// 写入最终产物的打包报告
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackagingReport {
    /// built / failed / unavailable
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exe: Option<PathBuf>,
    pub note: PathBuf,
}

/// 执行打包并写说明文件；只有说明文件本身写失败时才返回 Err
pub async fn package(
    packager: &dyn Packager,
    script: Option<&Path>,
    stem: &str,
    final_dir: &Path,
) -> Result<PackagingReport, std::io::Error> {
    let note = final_dir.join(format!("{}_exe_build.txt", stem));

    let outcome = match script {
        None => Err(PackagingError::NoEntryScript),
        Some(_) if !packager.available().await => Err(PackagingError::ToolchainUnavailable),
        Some(script) => {
            let code = tokio::fs::read_to_string(script).await.unwrap_or_default();
            let request = BuildRequest {
                script: script.to_path_buf(),
                stem: stem.to_string(),
                final_dir: final_dir.to_path_buf(),
                windowed: code.contains("tkinter"),
            };
            packager.build(&request).await
        }
    };

    let report = match outcome {
        Ok(output) => PackagingReport {
            status: "built".into(),
            message: format!(
                "Executable built: {} (log: {})",
                output.exe.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
                output.log.display()
            ),
            exe: Some(output.exe),
            note: note.clone(),
        },
        Err(e) => {
            let status = match e {
                PackagingError::ToolchainUnavailable => "unavailable",
                _ => "failed",
            };
            tracing::warn!(packager = packager.name(), error = %e, "executable build skipped");
            PackagingReport {
                status: status.into(),
                message: e.to_string(),
                exe: None,
                note: note.clone(),
            }
        }
    };

    tokio::fs::write(&note, format!("{}\n", report.message)).await?;
    Ok(report)
}
