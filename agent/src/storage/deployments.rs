//! Deployment persistence

use async_trait::async_trait;

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::models::deployment::{Deployment, DeploymentStatus};
use crate::storage::table::JsonTable;

#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), AgentError>;

    async fn get_deployment(&self, id: &str) -> Result<Deployment, AgentError>;

    /// Newest first
    async fn list_deployments(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Deployment>, AgentError>;

    /// Move a deployment to `status`.
    ///
    /// Fails with [`AgentError::TerminalState`] once the stored status is
    /// completed or failed; nothing is written in that case.
    async fn update_deployment_status(
        &self,
        id: &str,
        status: DeploymentStatus,
    ) -> Result<Deployment, AgentError>;
}

pub struct FileDeploymentStore {
    table: JsonTable<Deployment>,
}

impl FileDeploymentStore {
    pub async fn open(file: File) -> Result<Self, AgentError> {
        Ok(Self {
            table: JsonTable::open(file).await?,
        })
    }
}

#[async_trait]
impl DeploymentStore for FileDeploymentStore {
    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), AgentError> {
        self.table
            .update(|rows| {
                if rows.iter().any(|d| d.id == deployment.id) {
                    return Err(AgentError::StorageError(format!(
                        "deployment {} already exists",
                        deployment.id
                    )));
                }
                rows.push(deployment.clone());
                Ok(())
            })
            .await
    }

    async fn get_deployment(&self, id: &str) -> Result<Deployment, AgentError> {
        self.table
            .read(|rows| rows.iter().find(|d| d.id == id).cloned())
            .await
            .ok_or_else(|| AgentError::NotFound(format!("deployment {}", id)))
    }

    async fn list_deployments(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Deployment>, AgentError> {
        Ok(self
            .table
            .read(|rows| {
                let mut sorted: Vec<Deployment> = rows.to_vec();
                sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                sorted.into_iter().skip(offset).take(limit).collect()
            })
            .await)
    }

    async fn update_deployment_status(
        &self,
        id: &str,
        status: DeploymentStatus,
    ) -> Result<Deployment, AgentError> {
        self.table
            .update(|rows| {
                let deployment = rows
                    .iter_mut()
                    .find(|d| d.id == id)
                    .ok_or_else(|| AgentError::NotFound(format!("deployment {}", id)))?;
                deployment.transition(status)?;
                Ok(deployment.clone())
            })
            .await
    }
}
