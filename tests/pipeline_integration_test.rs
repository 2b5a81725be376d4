//! 流水线集成测试：通过公开 API 跑完整任务

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use orbit::agents::{default_registry, Agent, AgentRegistry, StageContext, StageOutput, StageResult};
use orbit::core::error::{PipelineError, StageError};
use orbit::core::keystore::KeyStore;
use orbit::core::manifest::Manifest;
use orbit::core::quota::QuotaState;
use orbit::core::supervisor::NEED_API_KEY;
use orbit::core::workspace::{Subdir, WorkspaceAllocator};
use orbit::llm::{CompletionGateway, CompletionProvider, MockProvider};
use orbit::packaging::PyInstallerPackager;
use orbit::{Orchestrator, Supervisor, Task};
use tempfile::TempDir;

struct Harness {
    supervisor: Supervisor,
    relay: Option<Arc<MockProvider>>,
    direct: Arc<MockProvider>,
    keys: Arc<KeyStore>,
}

fn harness(root: &Path, relay: Option<MockProvider>) -> Harness {
    let relay = relay.map(Arc::new);
    let direct = Arc::new(MockProvider::replying("def main():\n    return 'direct'\n"));
    let keys = Arc::new(KeyStore::in_memory());
    let gateway = Arc::new(CompletionGateway::new(
        Arc::new(QuotaState::new()),
        Arc::clone(&keys),
        relay.clone().map(|r| r as Arc<dyn CompletionProvider>),
        Arc::clone(&direct) as Arc<dyn CompletionProvider>,
    ));
    let orchestrator = Orchestrator::new(
        WorkspaceAllocator::new(root),
        default_registry(Arc::clone(&gateway)),
        Arc::new(PyInstallerPackager::new("orbit-no-such-python")),
    )
    .with_manifest(Arc::new(Manifest::new(root)));
    Harness {
        supervisor: Supervisor::new(Arc::new(orchestrator), gateway, Arc::clone(&keys)),
        relay,
        direct,
        keys,
    }
}

#[tokio::test]
async fn calculator_without_any_route_uses_templates() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), None);

    let response = h.supervisor.process_request("create a calculator").await;
    let artifact = response.artifact().expect("completed");

    assert!(artifact.success);
    assert_eq!(artifact.stage_order, vec!["engineer", "codegen", "tester", "patcher"]);
    assert!(artifact.stages.values().all(StageResult::is_success));
    let codegen = artifact.stages["codegen"].payload().unwrap();
    assert_eq!(codegen["method"], "template_based");
    assert_eq!(h.direct.calls(), 0);

    let final_json = artifact.workspace_root.join("final/create_a_calculator.json");
    assert!(final_json.is_file());
    for subdir in Subdir::ALL {
        assert!(artifact.workspace_root.join(subdir.as_str()).is_dir());
    }
    assert!(artifact.upgrade_hint.is_some());

    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("manifest.json")).unwrap()).unwrap();
    assert_eq!(manifest["total_tasks"], 1);
}

#[tokio::test]
async fn concurrent_relay_requests_share_two_call_cap() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), Some(MockProvider::replying("def main():\n    return 'relay'\n")));

    let texts: Vec<String> = (1..=3).map(|i| format!("write a function number {i}")).collect();
    let responses = h.supervisor.process_batch(&texts).await;

    let succeeded = responses.iter().filter(|r| r.is_success()).count();
    let rejected: Vec<_> = responses
        .iter()
        .filter(|r| r.error_code() == Some(NEED_API_KEY))
        .collect();
    assert_eq!(succeeded, 2);
    assert_eq!(rejected.len(), 1);

    let body = serde_json::to_value(rejected[0]).unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "NEED_API_KEY");
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .starts_with("Demo limit reached (2/2)"));

    assert_eq!(h.relay.as_ref().unwrap().calls(), 2);
    assert_eq!(h.supervisor.quota().consumed, 2);
    assert_eq!(h.supervisor.quota().in_flight, 0);
}

#[tokio::test]
async fn local_key_bypasses_exhausted_quota() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), Some(MockProvider::replying("x = 1\n")));
    for i in 0..2 {
        assert!(h.supervisor.process_request(&format!("write code {i}")).await.is_success());
    }
    assert_eq!(
        h.supervisor.process_request("write code 3").await.error_code(),
        Some(NEED_API_KEY)
    );

    h.keys.set_local_key("sk-local-test").unwrap();
    let response = h.supervisor.process_request("write code 4").await;
    let artifact = response.artifact().expect("completed");
    assert!(artifact.success);
    assert_eq!(artifact.stages["codegen"].payload().unwrap()["route"], "local_key");
    assert_eq!(h.direct.calls(), 1);
    assert_eq!(h.supervisor.quota().consumed, 2);
}

#[tokio::test]
async fn failed_relay_call_does_not_consume_quota() {
    let dir = TempDir::new().unwrap();
    let h = harness(
        dir.path(),
        Some(MockProvider::failing_then_replying(1, "print('ok')\n")),
    );

    let first = h.supervisor.process_request("write a script").await;
    let artifact = first.artifact().expect("completed");
    assert!(!artifact.success);
    assert!(matches!(
        &artifact.stages["codegen"],
        StageResult::Failed { reason, .. } if reason == "provider_error"
    ));
    assert_eq!(artifact.stages["tester"], StageResult::skipped(vec!["codegen".into()]));
    assert_eq!(artifact.stages["patcher"].status(), "skipped");
    assert_eq!(h.supervisor.quota().consumed, 0);

    assert!(h.supervisor.process_request("write a script again").await.is_success());
    assert_eq!(h.supervisor.quota().consumed, 1);
}

#[tokio::test]
async fn executable_request_without_toolchain_leaves_note() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), None);

    let response = h
        .supervisor
        .process_request("create a calculator and build an executable")
        .await;
    let artifact = response.artifact().expect("completed");
    assert!(artifact.success);

    let packaging = artifact.packaging.as_ref().expect("packaging attempted");
    assert_eq!(packaging.status, "unavailable");
    let note = std::fs::read_to_string(&packaging.note).unwrap();
    assert!(note.contains("PyInstaller not installed"));

    let final_dir = artifact.workspace_root.join("final");
    let names: Vec<String> = std::fs::read_dir(&final_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(names.iter().any(|n| n.ends_with("_exe_build.txt")));
    assert!(names.iter().any(|n| n.ends_with(".json")));
}

struct BrokenTester;

#[async_trait]
impl Agent for BrokenTester {
    fn name(&self) -> &str {
        "tester"
    }
    fn description(&self) -> &str {
        "always fails"
    }
    fn dependencies(&self) -> &[&'static str] {
        &["codegen"]
    }
    fn subdir(&self) -> Subdir {
        Subdir::Tests
    }
    async fn run(&self, _ctx: StageContext) -> Result<StageOutput, StageError> {
        Err(StageError::InvalidInput("validator crashed".into()))
    }
}

#[tokio::test]
async fn replaced_stage_failure_skips_only_its_dependents() {
    let dir = TempDir::new().unwrap();
    let gateway = Arc::new(CompletionGateway::new(
        Arc::new(QuotaState::new()),
        Arc::new(KeyStore::in_memory()),
        None,
        Arc::new(MockProvider::replying("unused")),
    ));
    let mut registry = default_registry(gateway);
    registry.register(BrokenTester);
    assert_eq!(registry.names(), ["engineer", "codegen", "tester", "patcher"]);

    let orchestrator = Orchestrator::new(
        WorkspaceAllocator::new(dir.path()),
        registry,
        Arc::new(PyInstallerPackager::new("orbit-no-such-python")),
    );
    let artifact = orchestrator.run(Task::new("create a calculator")).await.unwrap();

    assert!(!artifact.success);
    assert!(artifact.stages["codegen"].is_success());
    assert!(matches!(
        &artifact.stages["tester"],
        StageResult::Failed { message, .. } if message.contains("validator crashed")
    ));
    assert_eq!(artifact.stages["patcher"], StageResult::skipped(vec!["tester".into()]));
    assert!(artifact.artifact_path.is_file());
}

struct Loop(&'static str, &'static [&'static str]);

#[async_trait]
impl Agent for Loop {
    fn name(&self) -> &str {
        self.0
    }
    fn description(&self) -> &str {
        "cycle member"
    }
    fn dependencies(&self) -> &[&'static str] {
        self.1
    }
    fn subdir(&self) -> Subdir {
        Subdir::Engineering
    }
    async fn run(&self, _ctx: StageContext) -> Result<StageOutput, StageError> {
        panic!("cycle members must never run");
    }
}

#[tokio::test]
async fn cyclic_registry_aborts_before_allocation() {
    let dir = TempDir::new().unwrap();
    let mut registry = AgentRegistry::new();
    registry.register(Loop("a", &["c"]));
    registry.register(Loop("b", &["a"]));
    registry.register(Loop("c", &["b"]));

    let orchestrator = Orchestrator::new(
        WorkspaceAllocator::new(dir.path()),
        registry,
        Arc::new(PyInstallerPackager::new("orbit-no-such-python")),
    );
    match orchestrator.run(Task::new("anything")).await {
        Err(PipelineError::CyclicDependency(stages)) => assert_eq!(stages.len(), 3),
        other => panic!("expected cycle error, got {other:?}"),
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn same_description_reuses_workspace() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), None);
    let a = h.supervisor.process_request("create a calculator").await;
    let b = h.supervisor.process_request("create a calculator").await;
    assert_eq!(
        a.artifact().unwrap().workspace_root,
        b.artifact().unwrap().workspace_root
    );
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2); // 任务目录 + manifest.json
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn identical_concurrent_requests_all_complete() {
    let dir = TempDir::new().unwrap();
    let h = harness(dir.path(), None);
    let texts = vec!["create a calculator".to_string(); 8];

    for _ in 0..3 {
        let responses = h.supervisor.process_batch(&texts).await;
        for response in &responses {
            assert!(response.is_success(), "unexpected response: {response:?}");
        }
    }

    let artifact = h
        .supervisor
        .process_request("create a calculator")
        .await
        .artifact()
        .cloned()
        .expect("completed");
    let leftovers: Vec<String> = std::fs::read_dir(artifact.workspace_root.join("final"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");

    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("manifest.json")).unwrap()).unwrap();
    assert_eq!(manifest["total_tasks"], 1);
    assert_eq!(h.supervisor.status().await["total_tasks_processed"], 25);
}
