//! 编排错误分类
//!
//! 只有 WorkspaceError 与 PipelineError（循环依赖等配置错误）会中止整个任务；
//! StageError 记录到对应阶段，PackagingError 写成说明文件，QuotaExceeded 原样交给调用方。

use std::path::PathBuf;

use thiserror::Error;

/// 工作区文件系统错误（权限、磁盘满等），对任务是致命的
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 阶段试图写出自己的子目录
    #[error("path escape attempt: {0}")]
    PathEscape(String),

    #[error("failed to encode artifact: {0}")]
    Encode(#[from] serde_json::Error),
}

/// 流水线级错误：在任何阶段执行之前发现
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cyclic dependency among stages: {0:?}")]
    CyclicDependency(Vec<String>),

    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error("stage '{0}' registered twice")]
    DuplicateStage(String),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

/// 配额耗尽：携带已消耗与在途的名额，以便渲染「2/2」或「1/2, 1 pending」
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Demo limit reached ({used}/{cap}{}). Please add your OPENAI_API_KEY.", pending_note(.pending))]
pub struct QuotaExceeded {
    /// 已确认成功的中继调用
    pub used: u32,
    /// 仍在进行、可能失败并归还名额的调用
    pub pending: u32,
    pub cap: u32,
}

fn pending_note(pending: &u32) -> String {
    match pending {
        0 => String::new(),
        n => format!(", {n} pending"),
    }
}

impl QuotaExceeded {
    pub fn usage(&self) -> String {
        format!("{}/{}", self.used, self.cap)
    }
}

/// 单个阶段失败，记录进 Context，不中止流水线
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),

    #[error("completion provider failed: {0}")]
    Provider(String),

    #[error("missing input from '{0}'")]
    MissingInput(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    /// 阶段任务 panic 或被中止
    #[error("stage aborted: {0}")]
    Aborted(String),
}

impl StageError {
    /// 写入最终产物的稳定原因码
    pub fn code(&self) -> &'static str {
        match self {
            StageError::QuotaExceeded(_) => "quota_exceeded",
            StageError::Provider(_) => "provider_error",
            StageError::MissingInput(_) => "missing_input",
            StageError::InvalidInput(_) => "invalid_input",
            StageError::Workspace(_) => "workspace_error",
            StageError::Aborted(_) => "stage_aborted",
        }
    }
}

/// 打包失败：尽力而为，只写说明文件
#[derive(Error, Debug)]
pub enum PackagingError {
    #[error("PyInstaller not installed in environment; cannot build executable.")]
    ToolchainUnavailable,

    #[error("no entry script to package")]
    NoEntryScript,

    #[error("build exited with status {status}; see {log}")]
    BuildFailed { status: String, log: PathBuf },

    #[error("build succeeded but produced no executable")]
    NoOutput,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 本地凭据存储错误
#[derive(Error, Debug)]
pub enum KeyStoreError {
    #[error("INVALID_KEY: key must start with 'sk-'")]
    InvalidKey,

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed store: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to encode store: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// 组装运行时失败（启动阶段）
#[derive(Error, Debug)]
pub enum SetupError {
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error("relay client: {0}")]
    Relay(#[from] crate::llm::ProviderError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_message_carries_usage() {
        let err = QuotaExceeded { used: 2, pending: 0, cap: 2 };
        assert_eq!(err.usage(), "2/2");
        assert_eq!(
            err.to_string(),
            "Demo limit reached (2/2). Please add your OPENAI_API_KEY."
        );
    }

    #[test]
    fn quota_message_separates_pending_calls() {
        let err = QuotaExceeded { used: 1, pending: 1, cap: 2 };
        assert_eq!(err.usage(), "1/2");
        assert_eq!(
            err.to_string(),
            "Demo limit reached (1/2, 1 pending). Please add your OPENAI_API_KEY."
        );
    }

    #[test]
    fn stage_error_codes() {
        let quota: StageError = QuotaExceeded { used: 2, pending: 0, cap: 2 }.into();
        assert_eq!(quota.code(), "quota_exceeded");
        assert_eq!(StageError::Provider("boom".into()).code(), "provider_error");
        assert_eq!(StageError::MissingInput("codegen".into()).code(), "missing_input");
    }
}
