//! Outbox of task results awaiting acknowledgment by base

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::models::task::{TaskResult, TaskResultRecord};
use crate::storage::table::JsonTable;

#[async_trait]
pub trait TaskResultStore: Send + Sync {
    /// Every result with `synced_at == None`, in insertion order
    async fn list_unsent(&self) -> Result<Vec<TaskResult>, AgentError>;

    /// Upsert by task id. A re-saved result becomes unsent again.
    async fn save_results(&self, results: &[TaskResult]) -> Result<(), AgentError>;

    /// Record that base acknowledged these ids
    async fn mark_synced(&self, ids: &[String]) -> Result<(), AgentError>;

    /// Drop acknowledged rows synced before `before`; returns how many were removed
    async fn prune_synced(&self, before: DateTime<Utc>) -> Result<usize, AgentError>;
}

pub struct FileTaskResultStore {
    table: JsonTable<TaskResultRecord>,
}

impl FileTaskResultStore {
    pub async fn open(file: File) -> Result<Self, AgentError> {
        Ok(Self {
            table: JsonTable::open(file).await?,
        })
    }

    /// All rows, acknowledged or not
    pub async fn records(&self) -> Vec<TaskResultRecord> {
        self.table.read(|rows| rows.to_vec()).await
    }
}

#[async_trait]
impl TaskResultStore for FileTaskResultStore {
    async fn list_unsent(&self) -> Result<Vec<TaskResult>, AgentError> {
        Ok(self
            .table
            .read(|rows| {
                rows.iter()
                    .filter(|r| !r.is_synced())
                    .map(|r| r.result.clone())
                    .collect()
            })
            .await)
    }

    async fn save_results(&self, results: &[TaskResult]) -> Result<(), AgentError> {
        if results.is_empty() {
            return Ok(());
        }
        self.table
            .update(|rows| {
                for result in results {
                    match rows.iter_mut().find(|r| r.id() == result.id) {
                        Some(existing) => *existing = TaskResultRecord::unsent(result.clone()),
                        None => rows.push(TaskResultRecord::unsent(result.clone())),
                    }
                }
                Ok(())
            })
            .await
    }

    async fn mark_synced(&self, ids: &[String]) -> Result<(), AgentError> {
        if ids.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        self.table
            .update(|rows| {
                for row in rows.iter_mut().filter(|r| ids.iter().any(|id| id == r.id())) {
                    row.synced_at = Some(now);
                }
                Ok(())
            })
            .await
    }

    async fn prune_synced(&self, before: DateTime<Utc>) -> Result<usize, AgentError> {
        self.table
            .update(|rows| {
                let len = rows.len();
                rows.retain(|r| r.synced_at.map_or(true, |at| at >= before));
                Ok(len - rows.len())
            })
            .await
    }
}
