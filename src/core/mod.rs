//! 核心层：任务与工作区、配额闸门、凭据存储、编排器、结果汇总、清单、清理、会话内存储与 Supervisor

pub mod aggregator;
pub mod error;
pub mod keystore;
pub mod manifest;
pub mod memory;
pub mod orchestrator;
pub mod quota;
pub mod retention;
pub mod supervisor;
pub mod task;
pub mod workspace;

pub use aggregator::{finalize, FinalArtifact, FinalizeMeta, Traceability};
pub use error::{
    KeyStoreError, PackagingError, PipelineError, QuotaExceeded, SetupError, StageError,
    WorkspaceError,
};
pub use keystore::KeyStore;
pub use manifest::Manifest;
pub use memory::{MemoryMeta, MemoryStore};
pub use orchestrator::Orchestrator;
pub use quota::{CredentialSource, QuotaGate, QuotaSnapshot, QuotaState, QUOTA_CAP};
pub use retention::{cleanup, CleanupReport};
pub use supervisor::{ProcessResponse, Supervisor};
pub use task::{Task, TaskSlug};
pub use workspace::{SlugLease, StageDir, Subdir, Workspace, WorkspaceAllocator};
