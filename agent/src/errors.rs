//! Error types for the deployment daemon

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use openapi_server::models::ErrorResponse;
use thiserror::Error;

/// Main error type for the daemon
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Token error: {0}")]
    TokenError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Sync error: {0}")]
    SyncError(String),

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Timed out: {0}")]
    TimeoutError(String),

    #[error("Deployment {id} is already {status}")]
    TerminalState { id: String, status: String },

    #[error("Service manager error: {0}")]
    ServiceError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Instance not registered: {0}")]
    NotRegistered(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Short machine-readable name used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::IoError(_) => "io",
            AgentError::JsonError(_) => "json",
            AgentError::HttpError(_) => "http",
            AgentError::AuthError(_) => "auth",
            AgentError::TokenError(_) => "token",
            AgentError::StorageError(_) => "storage",
            AgentError::SyncError(_) => "sync",
            AgentError::DeployError(_) => "deploy",
            AgentError::TimeoutError(_) => "timeout",
            AgentError::TerminalState { .. } => "terminal_state",
            AgentError::ServiceError(_) => "service",
            AgentError::ServerError(_) => "server",
            AgentError::ShutdownError(_) => "shutdown",
            AgentError::NotRegistered(_) => "not_registered",
            AgentError::ConfigError(_) => "config",
            AgentError::ValidationError(_) => "validation",
            AgentError::NotFound(_) => "not_found",
            AgentError::Cancelled(_) => "cancelled",
            AgentError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AgentError::ValidationError(_) | AgentError::JsonError(_) => StatusCode::BAD_REQUEST,
            AgentError::NotFound(_) => StatusCode::NOT_FOUND,
            AgentError::TerminalState { .. } => StatusCode::CONFLICT,
            AgentError::AuthError(_) | AgentError::TokenError(_) => StatusCode::UNAUTHORIZED,
            AgentError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AgentError::TimeoutError(_))
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Internal(err.to_string())
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
