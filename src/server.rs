//! HTTP 入口
//!
//! - POST /process {text}：处理一个任务
//! - POST /config/openai {key}：保存本地 Key
//! - GET /status、/health、/api/health、/agents
//! - /webhooks/*、/autosync/*：本版本不提供，固定 403 PRO_FEATURE
//! - 其他路径 404 NOT_FOUND；请求体不是合法 JSON 时 400 INVALID_JSON

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::core::error::KeyStoreError;
use crate::core::supervisor::{ProcessResponse, Supervisor, EMPTY_TEXT, NEED_API_KEY};

pub type SharedSupervisor = Arc<Supervisor>;

#[derive(Debug, Deserialize)]
struct ProcessBody {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct KeyBody {
    #[serde(default)]
    key: String,
}

fn error(status: StatusCode, code: &str) -> Response {
    (status, Json(json!({ "success": false, "error": code }))).into_response()
}

pub fn router(supervisor: SharedSupervisor) -> Router {
    Router::new()
        .route("/process", post(process))
        .route("/config/openai", post(config_openai))
        .route("/status", get(status))
        .route("/agents", get(agents))
        .route("/health", get(health))
        .route("/api/health", get(health))
        .route("/webhooks", any(pro_feature))
        .route("/webhooks/*rest", any(pro_feature))
        .route("/autosync", any(pro_feature))
        .route("/autosync/*rest", any(pro_feature))
        .fallback(not_found)
        .with_state(supervisor)
}

async fn process(
    State(supervisor): State<SharedSupervisor>,
    body: Result<Json<ProcessBody>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = body else {
        return error(StatusCode::BAD_REQUEST, "INVALID_JSON");
    };
    let response = supervisor.process_request(&body.text).await;
    let status = match &response {
        ProcessResponse::Completed { .. } => StatusCode::OK,
        ProcessResponse::Rejected { error, .. } if error == EMPTY_TEXT => StatusCode::BAD_REQUEST,
        ProcessResponse::Rejected { error, .. } if error == NEED_API_KEY => StatusCode::FORBIDDEN,
        ProcessResponse::Rejected { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(response)).into_response()
}

async fn config_openai(
    State(supervisor): State<SharedSupervisor>,
    body: Result<Json<KeyBody>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = body else {
        return error(StatusCode::BAD_REQUEST, "INVALID_JSON");
    };
    match supervisor.set_local_key(&body.key) {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(KeyStoreError::InvalidKey) => error(StatusCode::BAD_REQUEST, "INVALID_KEY"),
        Err(e) => {
            tracing::error!(error = %e, "failed to save key");
            error(StatusCode::INTERNAL_SERVER_ERROR, "WRITE_FAILED")
        }
    }
}

async fn status(State(supervisor): State<SharedSupervisor>) -> Response {
    Json(supervisor.status().await).into_response()
}

async fn agents(State(supervisor): State<SharedSupervisor>) -> Response {
    Json(supervisor.agent_info(None)).into_response()
}

async fn health(State(supervisor): State<SharedSupervisor>) -> Response {
    Json(supervisor.health_check().await).into_response()
}

async fn pro_feature() -> Response {
    error(StatusCode::FORBIDDEN, "PRO_FEATURE")
}

async fn not_found() -> Response {
    error(StatusCode::NOT_FOUND, "NOT_FOUND")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::default_registry;
    use crate::core::keystore::KeyStore;
    use crate::core::orchestrator::Orchestrator;
    use crate::core::quota::QuotaState;
    use crate::core::workspace::WorkspaceAllocator;
    use crate::llm::{CompletionGateway, MockProvider};
    use crate::packaging::PyInstallerPackager;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(root: &std::path::Path) -> Router {
        let keys = Arc::new(KeyStore::in_memory());
        let gateway = Arc::new(CompletionGateway::new(
            Arc::new(QuotaState::new()),
            Arc::clone(&keys),
            None,
            Arc::new(MockProvider::replying("print('hi')\n")),
        ));
        let orchestrator = Orchestrator::new(
            WorkspaceAllocator::new(root),
            default_registry(Arc::clone(&gateway)),
            Arc::new(PyInstallerPackager::new("orbit-no-such-python")),
        );
        router(Arc::new(Supervisor::new(Arc::new(orchestrator), gateway, keys)))
    }

    async fn send(app: Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn process_runs_pipeline() {
        let dir = TempDir::new().unwrap();
        let (status, body) = send(app(dir.path()), "POST", "/process", r#"{"text":"create a calculator"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["result"]["stages"]["codegen"]["payload"]["method"], "template_based");
    }

    #[tokio::test]
    async fn process_validates_body() {
        let dir = TempDir::new().unwrap();
        let (status, body) = send(app(dir.path()), "POST", "/process", r#"{"text":""}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "EMPTY_TEXT");

        let (status, body) = send(app(dir.path()), "POST", "/process", "{oops").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_JSON");
    }

    #[tokio::test]
    async fn key_endpoint_checks_prefix() {
        let dir = TempDir::new().unwrap();
        let (status, body) = send(app(dir.path()), "POST", "/config/openai", r#"{"key":"pk-1"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_KEY");

        let (status, body) = send(app(dir.path()), "POST", "/config/openai", r#"{"key":"sk-1"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn gated_and_unknown_paths() {
        let dir = TempDir::new().unwrap();
        let (status, body) = send(app(dir.path()), "POST", "/webhooks/github", "{}").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "PRO_FEATURE");

        let (status, _) = send(app(dir.path()), "GET", "/autosync/run", "").await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(app(dir.path()), "GET", "/nope", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NOT_FOUND");

        let (status, body) = send(app(dir.path()), "GET", "/api/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["overall_status"], "healthy");
    }
}
