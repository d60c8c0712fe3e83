//! Deployment front door: validate, persist, submit

use std::sync::Arc;

use tracing::info;

use crate::deploy::runtime::Runtime;
use crate::deploy::worker::Worker;
use crate::errors::AgentError;
use crate::models::deployment::{Blueprint, Deployment, SourceKind};
use crate::storage::deployments::DeploymentStore;
use crate::utils::{generate_uuid, sanitize_name};
use openapi_server::models::DeployRequest;

/// User id recorded when a request carries none
pub const LOCAL_USER: &str = "local";

pub struct Deployer {
    deployments: Arc<dyn DeploymentStore>,
    worker: Arc<Worker>,
}

impl Deployer {
    pub fn new(deployments: Arc<dyn DeploymentStore>, worker: Arc<Worker>) -> Self {
        Self {
            deployments,
            worker,
        }
    }

    /// Reject malformed blueprints before anything is persisted
    pub fn validate(blueprint: &Blueprint) -> Result<(), AgentError> {
        if blueprint.name.trim().is_empty() {
            return Err(AgentError::ValidationError("name is required".to_string()));
        }
        if blueprint.name.chars().any(char::is_control) {
            return Err(AgentError::ValidationError(
                "name must not contain control characters".to_string(),
            ));
        }
        if sanitize_name(&blueprint.name).is_empty() {
            return Err(AgentError::ValidationError(format!(
                "name {:?} must contain at least one letter or digit",
                blueprint.name
            )));
        }

        let has_remote = blueprint
            .remote
            .as_ref()
            .is_some_and(|r| !r.url.trim().is_empty());
        let has_image = blueprint
            .image
            .as_ref()
            .is_some_and(|i| !i.trim().is_empty());
        if !has_remote && !has_image {
            return Err(AgentError::ValidationError(
                "either remote.url or image is required".to_string(),
            ));
        }
        if blueprint.source == SourceKind::Image && !has_image {
            return Err(AgentError::ValidationError(
                "image source requires an image".to_string(),
            ));
        }
        if let Some(remote) = &blueprint.remote {
            if has_remote && remote.branch.trim().is_empty() {
                return Err(AgentError::ValidationError(
                    "remote.branch must not be empty".to_string(),
                ));
            }
        }

        let runtime = Runtime::from_spec(&blueprint.runtime)?;
        if !blueprint.run_cmd.trim().is_empty() && runtime.is_none() {
            return Err(AgentError::ValidationError(
                "runtime.type is required when run_cmd is set".to_string(),
            ));
        }

        for (key, value) in &blueprint.env_vars {
            if !is_env_key(key) {
                return Err(AgentError::ValidationError(format!(
                    "env var name {:?} must match [A-Za-z_][A-Za-z0-9_]*",
                    key
                )));
            }
            // Multi-line values (PEM keys) are fine; other control bytes are not
            if value
                .chars()
                .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
            {
                return Err(AgentError::ValidationError(format!(
                    "env var {} contains control characters",
                    key
                )));
            }
        }

        if let Some(port) = blueprint.port {
            if port == 0 || port > u16::MAX as u32 {
                return Err(AgentError::ValidationError(format!(
                    "port {} is out of range",
                    port
                )));
            }
        }
        Ok(())
    }

    /// Validate and persist a pending deployment, then hand it to the worker
    pub async fn deploy(&self, request: DeployRequest) -> Result<Deployment, AgentError> {
        Self::validate(&request.blueprint)?;

        let user_id = request
            .user_id
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| LOCAL_USER.to_string());
        let deployment = Deployment::new(generate_uuid(), user_id, request.blueprint);
        self.deployments.create_deployment(&deployment).await?;
        info!(
            "Accepted deployment {} of {}",
            deployment.id, deployment.blueprint.name
        );

        self.worker.submit(&deployment.id).await?;
        Ok(deployment)
    }
}

fn is_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
