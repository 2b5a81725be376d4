//! Supervisor：请求入口
//!
//! 把自然语言请求解析为 Task，交给编排器执行，并把「配额耗尽且无本地 Key」翻译成 NEED_API_KEY。
//! 同时维护有上限的任务历史与会话内存储，提供状态、阶段信息、健康检查与输出目录清理。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::agents::default_registry;
use crate::config::{AppConfig, RetentionSection};
use crate::core::aggregator::FinalArtifact;
use crate::core::error::{KeyStoreError, SetupError};
use crate::core::keystore::{KeyStore, OPENAI_KEY};
use crate::core::manifest::Manifest;
use crate::core::memory::MemoryStore;
use crate::core::orchestrator::Orchestrator;
use crate::core::quota::{QuotaSnapshot, QuotaState};
use crate::core::retention::{cleanup, CleanupReport};
use crate::core::workspace::WorkspaceAllocator;
use crate::linguist::parse_task;
use crate::llm::CompletionGateway;
use crate::packaging::PyInstallerPackager;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const EMPTY_TEXT: &str = "EMPTY_TEXT";
pub const NEED_API_KEY: &str = "NEED_API_KEY";
pub const PIPELINE_ERROR: &str = "PIPELINE_ERROR";

const RECENT_TASKS: usize = 5;

/// 一条任务历史
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub task_id: Uuid,
    pub task_type: String,
    pub success: bool,
    /// 秒
    pub processing_time: f64,
}

/// 入口响应
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ProcessResponse {
    Completed {
        success: bool,
        task_id: Uuid,
        processing_time: f64,
        result: Box<FinalArtifact>,
    },
    Rejected {
        success: bool,
        error: String,
        detail: String,
    },
}

impl ProcessResponse {
    fn rejected(error: &str, detail: impl Into<String>) -> Self {
        ProcessResponse::Rejected {
            success: false,
            error: error.to_string(),
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            ProcessResponse::Completed { success, .. } => *success,
            ProcessResponse::Rejected { .. } => false,
        }
    }

    /// 拒绝时的错误码
    pub fn error_code(&self) -> Option<&str> {
        match self {
            ProcessResponse::Rejected { error, .. } => Some(error),
            ProcessResponse::Completed { .. } => None,
        }
    }

    pub fn artifact(&self) -> Option<&FinalArtifact> {
        match self {
            ProcessResponse::Completed { result, .. } => Some(result),
            ProcessResponse::Rejected { .. } => None,
        }
    }
}

pub struct Supervisor {
    orchestrator: Arc<Orchestrator>,
    gateway: Arc<CompletionGateway>,
    keys: Arc<KeyStore>,
    memory: MemoryStore,
    retention: RetentionSection,
    history: Mutex<VecDeque<HistoryEntry>>,
    history_limit: usize,
    /// 累计处理数，不受历史上限影响
    processed: AtomicU64,
    started: Instant,
}

impl Supervisor {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        gateway: Arc<CompletionGateway>,
        keys: Arc<KeyStore>,
    ) -> Self {
        Self {
            orchestrator,
            gateway,
            keys,
            memory: MemoryStore::new(),
            retention: RetentionSection::default(),
            history: Mutex::new(VecDeque::new()),
            history_limit: 100,
            processed: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn with_retention(mut self, retention: RetentionSection) -> Self {
        self.retention = retention;
        self
    }

    /// 按配置组装完整运行时：凭据存储、配额、网关、默认阶段、PyInstaller 打包、清单
    pub fn from_config(cfg: &AppConfig) -> Result<Self, SetupError> {
        let keys = Arc::new(KeyStore::open(&cfg.keystore.path)?);
        if let Some(key) = cfg.llm.api_key.as_deref() {
            keys.seed(OPENAI_KEY, key);
        }
        let state = Arc::new(QuotaState::new());
        let gateway = Arc::new(CompletionGateway::from_config(
            cfg,
            state,
            Arc::clone(&keys),
        )?);

        let output_root = &cfg.app.output_root;
        let orchestrator = Orchestrator::new(
            WorkspaceAllocator::new(output_root),
            default_registry(Arc::clone(&gateway)),
            Arc::new(PyInstallerPackager::new(cfg.packaging.python.clone())),
        )
        .with_force_exe(cfg.packaging.force_exe)
        .with_upgrade_hint(cfg.app.show_upgrade_hint)
        .with_manifest(Arc::new(Manifest::new(output_root)));

        Ok(Self::new(Arc::new(orchestrator), gateway, keys)
            .with_history_limit(cfg.app.history_limit)
            .with_retention(cfg.retention.clone()))
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// 会话内存储（REPL 的 remember / recall / memories / forget）
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn quota(&self) -> QuotaSnapshot {
        self.gateway.quota()
    }

    /// 保存本地 Key；之后的调用尝试立即走 LocalKey
    pub fn set_local_key(&self, key: &str) -> Result<(), KeyStoreError> {
        self.keys.set_local_key(key)
    }

    /// 处理一条请求
    pub async fn process_request(&self, text: &str) -> ProcessResponse {
        let text = text.trim();
        if text.is_empty() {
            return ProcessResponse::rejected(EMPTY_TEXT, "text is required");
        }
        let start = Instant::now();
        let (task, intent) = parse_task(text);
        let task_id = task.id;
        tracing::debug!(task_id = %task_id, intent = %intent.intent_type, confidence = intent.confidence, "request parsed");

        let artifact = match self.orchestrator.run(task).await {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "pipeline aborted");
                self.log_task(task_id, &intent.intent_type, false, start).await;
                return ProcessResponse::rejected(PIPELINE_ERROR, e.to_string());
            }
        };
        self.log_task(task_id, &intent.intent_type, artifact.success, start)
            .await;

        if let Some(detail) = artifact.quota_failure() {
            if !self.keys.local_key_present() {
                tracing::warn!(task_id = %task_id, quota = ?self.gateway.quota(), "demo quota exhausted");
                return ProcessResponse::rejected(NEED_API_KEY, detail);
            }
        }

        ProcessResponse::Completed {
            success: artifact.success,
            task_id,
            processing_time: start.elapsed().as_secs_f64(),
            result: Box::new(artifact),
        }
    }

    /// 并发处理多条相互独立的请求，结果顺序与输入一致
    pub async fn process_batch(&self, texts: &[String]) -> Vec<ProcessResponse> {
        join_all(texts.iter().map(|t| self.process_request(t))).await
    }

    async fn log_task(&self, task_id: Uuid, task_type: &str, success: bool, start: Instant) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let mut history = self.history.lock().await;
        history.push_back(HistoryEntry {
            timestamp: Utc::now(),
            task_id,
            task_type: task_type.to_string(),
            success,
            processing_time: start.elapsed().as_secs_f64(),
        });
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().await.iter().cloned().collect()
    }

    pub async fn status(&self) -> Value {
        let history = self.history.lock().await;
        let recent: Vec<&HistoryEntry> = history
            .iter()
            .skip(history.len().saturating_sub(RECENT_TASKS))
            .collect();
        json!({
            "status": "running",
            "version": VERSION,
            "agents": self.orchestrator.registry().names(),
            "total_tasks_processed": self.processed.load(Ordering::Relaxed),
            "recent_tasks": recent,
            "uptime_secs": self.started.elapsed().as_secs(),
            "quota": self.gateway.quota(),
            "relay_configured": self.gateway.relay_configured(),
            "local_key_present": self.keys.local_key_present(),
        })
    }

    /// 单个阶段或全部阶段的信息
    pub fn agent_info(&self, name: Option<&str>) -> Value {
        let registry = self.orchestrator.registry();
        let describe = |agent: &dyn crate::agents::Agent| {
            json!({
                "name": agent.name(),
                "version": VERSION,
                "description": agent.description(),
                "dependencies": agent.dependencies(),
            })
        };
        match name {
            Some(name) => match registry.get(name) {
                Some(agent) => describe(agent.as_ref()),
                None => json!({ "error": format!("Agent '{}' not found", name) }),
            },
            None => {
                let all: serde_json::Map<String, Value> = registry
                    .names()
                    .iter()
                    .filter_map(|n| registry.get(n).map(|a| (n.clone(), describe(a.as_ref()))))
                    .collect();
                Value::Object(all)
            }
        }
    }

    /// 阶段图可排序、会话内存储可读写且输出目录可创建时为 healthy
    pub async fn health_check(&self) -> Value {
        let mut checks = serde_json::Map::new();

        let order = self.orchestrator.stage_order();
        for name in self.orchestrator.registry().names() {
            let check = match &order {
                Ok(_) => json!({ "status": "healthy", "responsive": true }),
                Err(e) => json!({ "status": "error", "error": e.to_string() }),
            };
            checks.insert(name.clone(), check);
        }

        const PROBE_KEY: &str = "__health__";
        let saved = self.memory.save(PROBE_KEY, json!(true)).await.is_some();
        let recalled = self.memory.recall(PROBE_KEY).await.is_some();
        self.memory.clear(Some(PROBE_KEY)).await;
        let memory = if saved && recalled {
            json!({ "status": "healthy", "responsive": true })
        } else {
            json!({ "status": "error", "error": "memory store did not answer" })
        };
        checks.insert("memory".to_string(), memory);

        let root = self.orchestrator.output_root();
        let storage = match tokio::fs::create_dir_all(root).await {
            Ok(()) => json!({ "status": "healthy", "path": root }),
            Err(e) => json!({ "status": "error", "path": root, "error": e.to_string() }),
        };
        checks.insert("output_root".to_string(), storage);

        let healthy = checks
            .values()
            .all(|c| c.get("status").and_then(Value::as_str) == Some("healthy"));
        json!({
            "overall_status": if healthy { "healthy" } else { "degraded" },
            "agent_checks": checks,
            "timestamp": Utc::now(),
        })
    }

    /// 按保留策略清理输出目录（阻塞 IO，放到 blocking 线程）
    pub async fn cleanup(&self) -> std::io::Result<CleanupReport> {
        let root = self.orchestrator.output_root().to_path_buf();
        let policy = self.retention.clone();
        tokio::task::spawn_blocking(move || cleanup(&root, &policy))
            .await
            .map_err(std::io::Error::other)?
    }
}
