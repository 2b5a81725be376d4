//! 流水线编排器
//!
//! 一次 `run` 处理一个任务：先从注册表构建依赖图并排序（有环则在执行任何阶段之前失败），
//! 再取得该 slug 的租约并分配工作区，按拓扑序逐个执行阶段。
//! 阶段失败只记入 Context，依赖它的阶段标记为跳过。
//! 核心阶段之后按描述意图尝试打包，最后汇总写出最终产物并更新清单。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::agents::context::{Context, StageContext, StageResult};
use crate::agents::registry::{Agent, AgentRegistry};
use crate::core::aggregator::{finalize, FinalArtifact, FinalizeMeta};
use crate::core::error::{PipelineError, StageError};
use crate::core::manifest::Manifest;
use crate::core::task::Task;
use crate::core::workspace::{Subdir, Workspace, WorkspaceAllocator};
use crate::packaging::{package, wants_executable, Packager, PackagingReport};
use crate::workflow::StageGraph;

/// 流水线编排器；可被多个任务并发共享
pub struct Orchestrator {
    allocator: WorkspaceAllocator,
    registry: AgentRegistry,
    packager: Arc<dyn Packager>,
    force_exe: bool,
    show_upgrade_hint: bool,
    manifest: Option<Arc<Manifest>>,
}

impl Orchestrator {
    pub fn new(
        allocator: WorkspaceAllocator,
        registry: AgentRegistry,
        packager: Arc<dyn Packager>,
    ) -> Self {
        Self {
            allocator,
            registry,
            packager,
            force_exe: false,
            show_upgrade_hint: true,
            manifest: None,
        }
    }

    /// 不看描述关键词，总是尝试打包
    pub fn with_force_exe(mut self, force: bool) -> Self {
        self.force_exe = force;
        self
    }

    pub fn with_upgrade_hint(mut self, show: bool) -> Self {
        self.show_upgrade_hint = show;
        self
    }

    pub fn with_manifest(mut self, manifest: Arc<Manifest>) -> Self {
        self.manifest = Some(manifest);
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn output_root(&self) -> &std::path::Path {
        self.allocator.output_root()
    }

    fn agents(&self) -> Vec<Arc<dyn Agent>> {
        self.registry
            .names()
            .iter()
            .filter_map(|name| self.registry.get(name))
            .collect()
    }

    /// 阶段执行顺序
    pub fn stage_order(&self) -> Result<Vec<String>, PipelineError> {
        let agents = self.agents();
        let graph = StageGraph::new(
            agents
                .iter()
                .map(|a| (a.name(), a.dependencies().iter().copied())),
        )?;
        graph.topological_order()
    }

    /// 处理一个任务；只有依赖图错误与工作区错误会中止
    pub async fn run(&self, task: Task) -> Result<FinalArtifact, PipelineError> {
        let order = self.stage_order()?;
        // 同一描述的任务共用工作区，整个执行期间独占该 slug
        let _lease = self.allocator.lease(&task.slug()).await;
        let started_at = Utc::now();
        let workspace = self.allocator.allocate(&task.description).await?;
        let task = Arc::new(task);
        tracing::info!(task_id = %task.id, slug = %workspace.slug(), stages = ?order, "pipeline started");

        let mut context = Context::new();
        for name in &order {
            let Some(agent) = self.registry.get(name) else {
                continue;
            };
            let result = self.run_stage(agent, &task, &workspace, &context).await;
            context.record(name, result);
        }

        let packaging = self.maybe_package(&task, &workspace, &context).await;

        let artifact = finalize(
            &task,
            &context,
            &workspace,
            FinalizeMeta {
                started_at,
                packaging,
                show_upgrade_hint: self.show_upgrade_hint,
            },
        )
        .await?;

        if let Some(manifest) = &self.manifest {
            if let Err(e) = manifest.record(&artifact).await {
                tracing::warn!(error = %e, "manifest update failed");
            }
        }

        tracing::info!(
            task_id = %task.id,
            success = artifact.success,
            duration_ms = artifact.duration_ms,
            "pipeline finished"
        );
        Ok(artifact)
    }

    async fn run_stage(
        &self,
        agent: Arc<dyn Agent>,
        task: &Arc<Task>,
        workspace: &Workspace,
        context: &Context,
    ) -> StageResult {
        let name = agent.name().to_string();
        let deps = agent.dependencies();

        let blocked_by: Vec<String> = deps
            .iter()
            .filter(|dep| !context.get(dep).is_some_and(StageResult::is_success))
            .map(|dep| dep.to_string())
            .collect();
        if !blocked_by.is_empty() {
            tracing::warn!(stage = %name, blocked_by = ?blocked_by, "stage skipped");
            return StageResult::skipped(blocked_by);
        }

        let stage_ctx = StageContext {
            task: Arc::clone(task),
            inputs: context.inputs_for(deps),
            dir: workspace.stage_dir(agent.subdir()),
        };

        tracing::info!(stage = %name, "stage processing");
        let start = Instant::now();
        // 独立任务中执行，panic 也只记为该阶段失败
        let handle = tokio::spawn(async move { agent.run(stage_ctx).await });
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(join) => Err(StageError::Aborted(join.to_string())),
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                tracing::info!(stage = %name, elapsed_ms, files = output.files.len(), "stage completed");
                output.into()
            }
            Err(e) => {
                tracing::warn!(stage = %name, elapsed_ms, reason = e.code(), error = %e, "stage failed");
                StageResult::failed(&e)
            }
        }
    }

    /// 打包入口脚本：优先 patcher 修补后的文件，否则用 codegen 原文件
    fn entry_script(workspace: &Workspace, context: &Context) -> Option<PathBuf> {
        let entry_file = context
            .get("codegen")?
            .payload()?
            .get("entry_file")?
            .as_str()?;
        let patched = context.get("patcher").is_some_and(StageResult::is_success);
        [
            patched.then_some(Subdir::Patches),
            Some(Subdir::Codegen),
        ]
        .into_iter()
        .flatten()
        .filter_map(|subdir| workspace.stage_dir(subdir).resolve(entry_file).ok())
        .find(|path| path.is_file())
    }

    async fn maybe_package(
        &self,
        task: &Task,
        workspace: &Workspace,
        context: &Context,
    ) -> Option<PackagingReport> {
        if !(self.force_exe || wants_executable(&task.description)) {
            return None;
        }
        let script = Self::entry_script(workspace, context);
        let stem = workspace.slug().stem();
        match package(
            self.packager.as_ref(),
            script.as_deref(),
            &stem,
            &workspace.dir(Subdir::Final),
        )
        .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!(error = %e, "could not write packaging note");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::context::StageOutput;
    use crate::core::error::{PackagingError, StageError};
    use crate::packaging::{BuildOutput, BuildRequest};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct NoPackager;

    #[async_trait]
    impl Packager for NoPackager {
        fn name(&self) -> &str {
            "none"
        }
        async fn available(&self) -> bool {
            false
        }
        async fn build(&self, _: &BuildRequest) -> Result<BuildOutput, PackagingError> {
            Err(PackagingError::ToolchainUnavailable)
        }
    }

    struct Step {
        name: &'static str,
        deps: &'static [&'static str],
        fail: bool,
        panic: bool,
        runs: Arc<AtomicUsize>,
    }

    impl Step {
        fn ok(name: &'static str, deps: &'static [&'static str], runs: &Arc<AtomicUsize>) -> Self {
            Self {
                name,
                deps,
                fail: false,
                panic: false,
                runs: Arc::clone(runs),
            }
        }
    }

    #[async_trait]
    impl Agent for Step {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "test step"
        }
        fn dependencies(&self) -> &[&'static str] {
            self.deps
        }
        fn subdir(&self) -> Subdir {
            Subdir::Engineering
        }
        async fn run(&self, ctx: StageContext) -> Result<StageOutput, StageError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.panic {
                panic!("boom");
            }
            if self.fail {
                return Err(StageError::Provider("503".into()));
            }
            for dep in self.deps {
                ctx.inputs.payload(dep)?;
            }
            let path = ctx.dir.write_file(&format!("{}.txt", self.name), self.name).await?;
            Ok(StageOutput::new().with("stage", self.name).file(path))
        }
    }

    fn orchestrator(root: &std::path::Path, registry: AgentRegistry) -> Orchestrator {
        Orchestrator::new(WorkspaceAllocator::new(root), registry, Arc::new(NoPackager))
            .with_upgrade_hint(false)
    }

    #[tokio::test]
    async fn runs_in_dependency_order() {
        let dir = TempDir::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut registry = AgentRegistry::new();
        registry.register(Step::ok("c", &["b"], &runs));
        registry.register(Step::ok("b", &["a"], &runs));
        registry.register(Step::ok("a", &[], &runs));

        let artifact = orchestrator(dir.path(), registry)
            .run(Task::new("order test"))
            .await
            .unwrap();
        assert!(artifact.success);
        assert_eq!(artifact.stage_order, vec!["a", "b", "c"]);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(artifact.packaging.is_none());
    }

    #[tokio::test]
    async fn failure_skips_dependents_but_not_siblings() {
        let dir = TempDir::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut registry = AgentRegistry::new();
        registry.register(Step::ok("a", &[], &runs));
        registry.register(Step {
            fail: true,
            ..Step::ok("b", &["a"], &runs)
        });
        registry.register(Step::ok("c", &["b"], &runs));
        registry.register(Step::ok("d", &["a"], &runs));

        let artifact = orchestrator(dir.path(), registry)
            .run(Task::new("failure test"))
            .await
            .unwrap();
        assert!(!artifact.success);
        assert_eq!(artifact.stages["b"].status(), "failed");
        assert_eq!(
            artifact.stages["c"],
            StageResult::skipped(vec!["b".into()])
        );
        assert!(artifact.stages["d"].is_success());
        // c 没有执行
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn panicking_stage_is_recorded() {
        let dir = TempDir::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut registry = AgentRegistry::new();
        registry.register(Step {
            panic: true,
            ..Step::ok("a", &[], &runs)
        });
        registry.register(Step::ok("b", &["a"], &runs));

        let artifact = orchestrator(dir.path(), registry)
            .run(Task::new("panic test"))
            .await
            .unwrap();
        assert!(matches!(
            &artifact.stages["a"],
            StageResult::Failed { reason, .. } if reason == "stage_aborted"
        ));
        assert_eq!(artifact.stages["b"].status(), "skipped");
    }

    #[tokio::test]
    async fn cycle_fails_before_any_stage_or_directory() {
        let dir = TempDir::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut registry = AgentRegistry::new();
        registry.register(Step::ok("a", &["b"], &runs));
        registry.register(Step::ok("b", &["a"], &runs));

        let err = orchestrator(dir.path(), registry)
            .run(Task::new("cycle test"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::CyclicDependency(_)));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn exe_intent_writes_note_without_failing() {
        let dir = TempDir::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut registry = AgentRegistry::new();
        registry.register(Step::ok("a", &[], &runs));

        let artifact = orchestrator(dir.path(), registry)
            .run(Task::new("build an executable please"))
            .await
            .unwrap();
        assert!(artifact.success);
        let report = artifact.packaging.unwrap();
        // 没有 codegen 入口脚本
        assert_eq!(report.status, "failed");
        assert!(report.note.is_file());
    }
}
