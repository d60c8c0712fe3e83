//! Provisioned OS service record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::deployment::{Deployment, RemoteSpec, RuntimeSpec};

/// A service installed for a completed deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,

    /// Sanitized service name
    pub name: String,

    pub deployment_id: String,

    pub runtime: RuntimeSpec,

    pub run_cmd: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_cmd: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u32>,

    /// Remote provenance, including the commit that was deployed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteSpec>,

    pub working_dir: String,

    pub created_at: DateTime<Utc>,
}

impl Service {
    pub fn from_deployment(deployment: &Deployment, name: &str, working_dir: &str) -> Self {
        let blueprint = &deployment.blueprint;
        Self {
            id: crate::utils::generate_uuid(),
            name: name.to_string(),
            deployment_id: deployment.id.clone(),
            runtime: blueprint.runtime.clone(),
            run_cmd: blueprint.run_cmd.clone(),
            build_cmd: blueprint.build_cmd.clone(),
            port: blueprint.port,
            remote: blueprint.remote.clone(),
            working_dir: working_dir.to_string(),
            created_at: Utc::now(),
        }
    }
}
