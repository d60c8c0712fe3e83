//! Executes remote tasks against the daemon's own router

use std::sync::Arc;

use axum::body::Body;
use axum::Router;
use http::{header, Method, Request};
use openapi_client::models::{Task, TaskResult};
use serde_json::Value;
use tower::ServiceExt;
use tracing::{debug, warn};

use crate::app::state::DaemonState;
use crate::errors::AgentError;

/// Largest response body read back from a handler
const MAX_RESPONSE_BYTES: usize = 8 * 1024 * 1024;

/// Split `<path>:<method>` on the last colon
pub fn parse_task_type(kind: &str) -> Result<(String, Method), AgentError> {
    let (path, method) = kind.rsplit_once(':').ok_or_else(|| {
        AgentError::ValidationError(format!(
            "task type {:?} is not of the form <path>:<method>",
            kind
        ))
    })?;
    let path = path.trim().trim_start_matches('/');
    let method = method.trim();
    if path.is_empty() || method.is_empty() {
        return Err(AgentError::ValidationError(format!(
            "task type {:?} has an empty path or method",
            kind
        )));
    }
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(|_| {
        AgentError::ValidationError(format!("task type {:?} has an invalid method", kind))
    })?;
    Ok((format!("/{}", path), method))
}

/// Turns a [`Task`] into an in-process HTTP request
pub struct TaskExecutor {
    router: Router,
    daemon: Arc<DaemonState>,
}

impl TaskExecutor {
    pub fn new(router: Router, daemon: Arc<DaemonState>) -> Self {
        Self { router, daemon }
    }

    /// Run one task. Never fails; failures are reported in the result.
    pub async fn execute(&self, task: &Task) -> TaskResult {
        self.daemon.task_started();
        let result = match self.dispatch(task).await {
            Ok(result) => result,
            Err(e) => TaskResult::failed(&task.id, e.to_string()),
        };
        self.daemon.task_finished(result.error.is_some());
        result
    }

    async fn dispatch(&self, task: &Task) -> Result<TaskResult, AgentError> {
        let (path, method) = parse_task_type(&task.kind)?;
        debug!("Executing task {}: {} {}", task.id, method, path);

        let body = match &task.payload {
            Value::Null => Body::empty(),
            payload => Body::from(serde_json::to_vec(payload)?),
        };
        let request = Request::builder()
            .method(method)
            .uri(&path)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-request-id", task.id.as_str())
            .header("x-trace-id", format!("task-{}", task.id))
            .body(body)
            .map_err(|e| AgentError::ValidationError(format!("invalid task request: {}", e)))?;

        let response = match self.router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(infallible) => match infallible {},
        };
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), MAX_RESPONSE_BYTES)
            .await
            .map_err(|e| AgentError::Internal(format!("failed to read task response: {}", e)))?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes);
            warn!("Task {} failed with HTTP {}", task.id, status.as_u16());
            return Ok(TaskResult::failed(
                &task.id,
                format!("HTTP {}: {}", status.as_u16(), text.trim()),
            ));
        }

        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
        };
        Ok(TaskResult::done(&task.id, value))
    }
}
