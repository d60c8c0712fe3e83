//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use openapi_server::models::{
    DeployRequest, HealthResponse, ListParams, MetricsResponse, SyncTriggerResponse,
    VersionResponse,
};

use crate::errors::AgentError;
use crate::server::state::ServerState;
use crate::telemetry::collect_system_info;
use crate::utils::version_info;

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "deployd".to_string(),
        version: version.version,
        mode: state.daemon.mode().as_str().to_string(),
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Accept a deployment; responds with the pending record
pub async fn create_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<DeployRequest>,
) -> Result<impl IntoResponse, AgentError> {
    let deployment = state.deployer.deploy(request).await?;
    Ok((StatusCode::CREATED, Json(deployment)))
}

pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AgentError> {
    let deployments = state
        .deployments
        .list_deployments(params.limit, params.offset)
        .await?;
    Ok(Json(deployments))
}

pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AgentError> {
    let deployment = state.deployments.get_deployment(&id).await?;
    Ok(Json(deployment))
}

pub async fn list_services_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, AgentError> {
    Ok(Json(state.services.list_services().await?))
}

/// Host facts, the same ones reported to base
pub async fn system_handler() -> Result<impl IntoResponse, AgentError> {
    let info = tokio::task::spawn_blocking(collect_system_info)
        .await
        .map_err(|e| AgentError::Internal(format!("system info task failed: {}", e)))?;
    Ok(Json(info))
}

/// Ask the poller for an immediate sync cycle
pub async fn sync_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.daemon.request_sync();
    (
        StatusCode::ACCEPTED,
        Json(SyncTriggerResponse {
            accepted: true,
            message: "Sync requested".to_string(),
        }),
    )
}

/// Metrics handler
pub async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let sync = state.daemon.sync_state();
    Json(MetricsResponse {
        tasks_in_flight: state.daemon.tasks_in_flight(),
        tasks_executed: state.daemon.tasks_executed(),
        tasks_failed: state.daemon.tasks_failed(),
        active_deployments: state.worker.active_count(),
        queued_deployments: state.worker.queued_count(),
        available_slots: state.worker.available_slots(),
        sync_err_streak: sync.err_streak,
        last_synced_at: sync.last_synced_at.map(|t| t.to_rfc3339()),
    })
}
