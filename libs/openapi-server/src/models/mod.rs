//! API models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Where the deployed code comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Git,
    Image,
}

/// Language runtime requested by a blueprint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSpec {
    /// Runtime name, e.g. `node`, `python`, `static`
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Version handed to the version manager (`latest` when empty)
    #[serde(default)]
    pub version: String,
}

/// Git remote of a blueprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSpec {
    pub url: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Pinned commit, checked out after clone/pull
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

/// Immutable deployment specification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,

    #[serde(default)]
    pub source: SourceKind,

    #[serde(default)]
    pub runtime: RuntimeSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteSpec>,

    #[serde(default)]
    pub run_cmd: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_cmd: Option<String>,

    /// Kept wider than `u16` so out-of-range ports are a validation error
    /// rather than a decode error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,

    /// Sub-directory of the checkout the service runs in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
}

/// Body of `POST /deployments`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    #[serde(default)]
    pub user_id: Option<String>,

    pub blueprint: Blueprint,
}

/// Pagination for list endpoints
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: usize,

    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub mode: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Response of `POST /sync`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTriggerResponse {
    pub accepted: bool,
    pub message: String,
}

/// Daemon gauges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub tasks_in_flight: i64,
    pub tasks_executed: u64,
    pub tasks_failed: u64,
    pub active_deployments: usize,
    pub queued_deployments: usize,
    pub available_slots: usize,
    pub sync_err_streak: u32,
    pub last_synced_at: Option<String>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
