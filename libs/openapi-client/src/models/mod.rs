//! API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response of `POST /v1/agent/token`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTokenResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<AgentTokenData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTokenData {
    pub token: String,
}

/// Host facts reported with every status call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub hostname: String,
    pub os: String,
    pub os_version: String,
    pub kernel_version: String,
    pub arch: String,
    pub cpu_count: usize,
    pub cpu_usage: f32,
    pub memory_used: u64,
    pub memory_total: u64,
    pub disk_used: u64,
    pub disk_total: u64,
    pub uptime_secs: u64,
}

/// Body of `POST /v1/agent/instances/{id}/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRequest {
    pub version: String,
    pub compatibility_date: String,
    pub system: SystemInfo,
    pub completed_tasks: Vec<TaskResult>,
}

/// Response of the status call. New tasks ride along in `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<StatusData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusData {
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// A unit of work issued by base.
///
/// `kind` is a task address of the form `"<path>:<method>"`, e.g.
/// `"deployments:post"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "updatedAt", default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Outcome of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResultStatus {
    Done,
    Failed,
}

/// Execution result of a [`Task`], keyed by the task id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: String,
    pub status: TaskResultStatus,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    pub fn done(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            status: TaskResultStatus::Done,
            result,
            error: None,
        }
    }

    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TaskResultStatus::Failed,
            result: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}
