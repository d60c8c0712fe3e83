//! Local HTTP API tests, driven in-process

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use deployd::app::state::DaemonState;
use deployd::deploy::deployer::Deployer;
use deployd::deploy::worker::{Options, Worker};
use deployd::filesys::file::File;
use deployd::models::task::{Task, TaskResultStatus};
use deployd::server::serve::router;
use deployd::server::state::ServerState;
use deployd::storage::deployments::FileDeploymentStore;
use deployd::storage::services::FileServiceStore;
use deployd::sync::executor::TaskExecutor;

use crate::fakes::FakePipeline;

struct Fixture {
    _dir: tempfile::TempDir,
    daemon: Arc<DaemonState>,
    worker: Arc<Worker>,
    app: Router,
}

/// The worker is never started, so submitted deployments stay pending
async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let deployments = Arc::new(
        FileDeploymentStore::open(File::new(dir.path().join("deployments.json")))
            .await
            .unwrap(),
    );
    let services = Arc::new(
        FileServiceStore::open(File::new(dir.path().join("services.json")))
            .await
            .unwrap(),
    );
    let worker = Arc::new(Worker::new(
        &Options::default(),
        deployments.clone(),
        services.clone(),
        Arc::new(FakePipeline::default()),
    ));
    let deployer = Arc::new(Deployer::new(deployments.clone(), worker.clone()));
    let daemon = Arc::new(DaemonState::new());
    let state = ServerState::new(daemon.clone(), deployments, services, deployer, worker.clone());

    Fixture {
        _dir: dir,
        daemon,
        worker,
        app: router(Arc::new(state)),
    }
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(body) => Body::from(serde_json::to_vec(&body).unwrap()),
            None => Body::empty(),
        })
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn deploy_body(name: &str) -> Value {
    json!({
        "user_id": "u-1",
        "blueprint": {
            "name": name,
            "runtime": { "type": "node", "version": "20" },
            "remote": { "url": "https://github.com/u/r.git" },
            "run_cmd": "node server.js",
            "port": 3000
        }
    })
}

#[tokio::test]
async fn test_health_and_version() {
    let fx = fixture().await;

    let (status, body) = call(&fx.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["mode"], "running");

    let (status, body) = call(&fx.app, "GET", "/version", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_create_and_fetch_deployment() {
    let fx = fixture().await;

    let (status, created) = call(&fx.app, "POST", "/deployments", Some(deploy_body("api"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "pending");
    assert_eq!(created["blueprint"]["remote"]["branch"], "main");
    assert_eq!(fx.worker.queued_count(), 1);

    let id = created["id"].as_str().unwrap();
    let (status, fetched) = call(&fx.app, "GET", &format!("/deployments/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, created);

    let (status, listed) = call(&fx.app, "GET", "/deployments?limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (status, body) = call(&fx.app, "GET", "/deployments/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_invalid_deployment_is_rejected_before_persisting() {
    let fx = fixture().await;

    let mut body = deploy_body("api");
    body["blueprint"]["port"] = json!(70000);
    let (status, error) = call(&fx.app, "POST", "/deployments", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "validation");

    let (_, listed) = call(&fx.app, "GET", "/deployments", None).await;
    assert!(listed.as_array().unwrap().is_empty());
    assert_eq!(fx.worker.queued_count(), 0);
}

#[tokio::test]
async fn test_sync_trigger_and_metrics() {
    let fx = fixture().await;

    let waiter = {
        let daemon = fx.daemon.clone();
        tokio::spawn(async move { daemon.sync_requested().await })
    };
    let (status, body) = call(&fx.app, "POST", "/sync", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["accepted"], true);
    tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();

    let (status, metrics) = call(&fx.app, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["tasks_in_flight"], 0);
    assert_eq!(metrics["available_slots"], 2);
    assert_eq!(metrics["sync_err_streak"], 0);
}

#[tokio::test]
async fn test_task_dispatch_through_router() {
    let fx = fixture().await;
    let executor = TaskExecutor::new(fx.app.clone(), fx.daemon.clone());

    let task = Task {
        id: "task-1".to_string(),
        kind: "deployments:post".to_string(),
        payload: deploy_body("from-base"),
        status: "pending".to_string(),
        created_at: None,
        updated_at: None,
    };
    let result = executor.execute(&task).await;
    assert_eq!(result.status, TaskResultStatus::Done);
    assert_eq!(result.result["status"], "pending");
    assert_eq!(result.result["blueprint"]["name"], "from-base");

    let bad = Task {
        id: "task-2".to_string(),
        kind: "deployments:post".to_string(),
        payload: json!({ "blueprint": { "name": "" } }),
        ..task
    };
    let result = executor.execute(&bad).await;
    assert_eq!(result.status, TaskResultStatus::Failed);
    assert!(result.error.unwrap().starts_with("HTTP 400"));
    assert_eq!(fx.daemon.tasks_executed(), 2);
    assert_eq!(fx.daemon.tasks_failed(), 1);
}
