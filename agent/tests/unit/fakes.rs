//! Test doubles shared by the integration tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use deployd::deploy::pipeline::DeploymentPipeline;
use deployd::deploy::service_mngr::{ServiceManager, ServiceSpec, ServiceStatus};
use deployd::errors::AgentError;
use deployd::models::deployment::{Blueprint, Deployment, DeploymentStatus, RemoteSpec, RuntimeSpec};
use deployd::models::service::Service;
use deployd::storage::deployments::DeploymentStore;

pub fn blueprint(name: &str) -> Blueprint {
    Blueprint {
        name: name.to_string(),
        runtime: RuntimeSpec {
            kind: "node".to_string(),
            version: "20".to_string(),
        },
        remote: Some(RemoteSpec {
            url: "https://github.com/u/r.git".to_string(),
            branch: "main".to_string(),
            commit_hash: None,
        }),
        run_cmd: "node server.js".to_string(),
        ..Default::default()
    }
}

/// Pipeline that sleeps, records peak concurrency and optionally fails
#[derive(Default)]
pub struct FakePipeline {
    pub delay: Duration,
    pub fail: bool,
    pub running: AtomicUsize,
    pub peak: AtomicUsize,
    pub runs: AtomicUsize,
    /// When set, every run waits for this token before finishing
    pub gate: Option<CancellationToken>,
}

#[async_trait]
impl DeploymentPipeline for FakePipeline {
    async fn execute(
        &self,
        deployment: &Deployment,
        _cancel: &CancellationToken,
    ) -> Result<Option<Service>, AgentError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        if let Some(gate) = &self.gate {
            gate.cancelled().await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(AgentError::DeployError("build stage failed: boom".to_string()));
        }
        Ok(Some(Service::from_deployment(
            deployment,
            &deployd::utils::sanitize_name(&deployment.blueprint.name),
            "/tmp/workspace",
        )))
    }
}

/// Service manager that keeps everything in memory
#[derive(Default)]
pub struct FakeServiceManager {
    pub existing: Mutex<Option<ServiceStatus>>,
    pub installed: Mutex<Vec<ServiceSpec>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeServiceManager {
    pub fn with_existing(status: ServiceStatus) -> Self {
        Self {
            existing: Mutex::new(Some(status)),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceManager for FakeServiceManager {
    async fn status(&self, _name: &str) -> Result<ServiceStatus, AgentError> {
        Ok(self
            .existing
            .lock()
            .unwrap()
            .unwrap_or(ServiceStatus::NotInstalled))
    }

    async fn install(&self, spec: &ServiceSpec) -> Result<(), AgentError> {
        self.calls.lock().unwrap().push(format!("install {}", spec.name));
        self.installed.lock().unwrap().push(spec.clone());
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), AgentError> {
        self.calls.lock().unwrap().push(format!("start {}", name));
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), AgentError> {
        self.calls.lock().unwrap().push(format!("stop {}", name));
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), AgentError> {
        self.calls.lock().unwrap().push(format!("remove {}", name));
        Ok(())
    }
}

/// Wait until `id` reaches a terminal status
pub async fn wait_terminal(store: &dyn DeploymentStore, id: &str) -> DeploymentStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = store.get_deployment(id).await.unwrap().status;
        if status.is_terminal() {
            return status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "deployment {} stuck in {}",
            id,
            status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// In-process stand-in for base
#[derive(Default)]
pub struct FakeBase {
    /// Status reports answer 500 while set
    pub fail_status: AtomicBool,
    /// Token exchanges answer `success: false` while set
    pub reject_tokens: AtomicBool,
    /// Every status body received, including rejected ones
    pub reports: Mutex<Vec<Value>>,
    /// Tasks handed out with the next accepted report
    pub pending_tasks: Mutex<Vec<Value>>,
    pub auth_headers: Mutex<Vec<String>>,
}

impl FakeBase {
    pub fn reports(&self) -> Vec<Value> {
        self.reports.lock().unwrap().clone()
    }

    pub fn queue_task(&self, task: Value) {
        self.pending_tasks.lock().unwrap().push(task);
    }
}

async fn token_handler(State(base): State<Arc<FakeBase>>) -> Json<Value> {
    if base.reject_tokens.load(Ordering::SeqCst) {
        return Json(json!({ "success": false, "message": "revoked" }));
    }
    Json(json!({ "success": true, "data": { "token": "agent-token" } }))
}

async fn status_handler(
    State(base): State<Arc<FakeBase>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        base.auth_headers.lock().unwrap().push(auth.to_string());
    }
    base.reports.lock().unwrap().push(body);
    if base.fail_status.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "message": "down" })),
        );
    }
    let tasks: Vec<Value> = base.pending_tasks.lock().unwrap().drain(..).collect();
    (
        StatusCode::OK,
        Json(json!({ "success": true, "message": "ok", "data": { "tasks": tasks } })),
    )
}

/// Serve a [`FakeBase`] on an ephemeral port; returns its base URL
pub async fn spawn_base(base: Arc<FakeBase>) -> String {
    let app = Router::new()
        .route("/v1/agent/token", post(token_handler))
        .route("/v1/agent/instances/{id}/status", post(status_handler))
        .with_state(base);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}
