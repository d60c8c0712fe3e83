//! Task models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use openapi_client::models::{Task, TaskResult, TaskResultStatus};

/// Outbox row holding a [`TaskResult`] until base acknowledges it.
///
/// `synced_at == None` means base has not confirmed receipt yet and the
/// result must be sent again on every sync cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResultRecord {
    #[serde(flatten)]
    pub result: TaskResult,

    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
}

impl TaskResultRecord {
    pub fn unsent(result: TaskResult) -> Self {
        Self {
            result,
            synced_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.result.id
    }

    pub fn is_synced(&self) -> bool {
        self.synced_at.is_some()
    }
}
