//! Deployment models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;

pub use openapi_server::models::{Blueprint, RemoteSpec, RuntimeSpec, SourceKind};

/// Lifecycle of a deployment.
///
/// `Pending -> InProgress -> Completed | Failed`. The last two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::InProgress => "in_progress",
            DeploymentStatus::Completed => "completed",
            DeploymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Completed | DeploymentStatus::Failed)
    }

    /// Check that moving from `self` to `next` is allowed
    pub fn check_transition(&self, id: &str, next: DeploymentStatus) -> Result<(), AgentError> {
        if self.is_terminal() {
            return Err(AgentError::TerminalState {
                id: id.to_string(),
                status: self.to_string(),
            });
        }

        let allowed = matches!(
            (self, next),
            (DeploymentStatus::Pending, DeploymentStatus::InProgress)
                | (DeploymentStatus::Pending, DeploymentStatus::Failed)
                | (DeploymentStatus::InProgress, DeploymentStatus::Completed)
                | (DeploymentStatus::InProgress, DeploymentStatus::Failed)
        );
        if !allowed {
            return Err(AgentError::ValidationError(format!(
                "invalid status transition for deployment {}: {} -> {}",
                id, self, next
            )));
        }
        Ok(())
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deployment request accepted by the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,

    pub user_id: String,

    pub blueprint: Blueprint,

    pub status: DeploymentStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    /// Create a new pending deployment
    pub fn new(id: String, user_id: String, blueprint: Blueprint) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            blueprint,
            status: DeploymentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a status transition, rejecting it when not allowed
    pub fn transition(&mut self, next: DeploymentStatus) -> Result<(), AgentError> {
        self.status.check_transition(&self.id, next)?;
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}
