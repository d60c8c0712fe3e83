//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::AgentError;
use crate::server::handlers::{
    create_deployment_handler, get_deployment_handler, health_handler, list_deployments_handler,
    list_services_handler, metrics_handler, sync_handler, system_handler, version_handler,
};
use crate::server::state::ServerState;

/// The daemon's routes.
///
/// Served on the local socket and also driven in-process by the task
/// executor.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deployments
        .route(
            "/deployments",
            get(list_deployments_handler).post(create_deployment_handler),
        )
        .route("/deployments/{id}", get(get_deployment_handler))
        .route("/services", get(list_services_handler))
        // Host and daemon
        .route("/system", get(system_handler))
        .route("/sync", post(sync_handler))
        .route("/metrics", get(metrics_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    app: Router,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), AgentError>>, AgentError> {
    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AgentError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| AgentError::ServerError(e.to_string()))
    });

    Ok(handle)
}
