//! Service persistence

use async_trait::async_trait;

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::models::service::Service;
use crate::storage::table::JsonTable;

#[async_trait]
pub trait ServiceStore: Send + Sync {
    async fn create_service(&self, service: &Service) -> Result<(), AgentError>;

    async fn list_services(&self) -> Result<Vec<Service>, AgentError>;
}

pub struct FileServiceStore {
    table: JsonTable<Service>,
}

impl FileServiceStore {
    pub async fn open(file: File) -> Result<Self, AgentError> {
        Ok(Self {
            table: JsonTable::open(file).await?,
        })
    }
}

#[async_trait]
impl ServiceStore for FileServiceStore {
    async fn create_service(&self, service: &Service) -> Result<(), AgentError> {
        self.table
            .update(|rows| {
                rows.push(service.clone());
                Ok(())
            })
            .await
    }

    async fn list_services(&self) -> Result<Vec<Service>, AgentError> {
        Ok(self.table.read(|rows| rows.to_vec()).await)
    }
}
