//! Registered instance identity

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::AgentError;
use crate::filesys::file::File;

/// Long-lived identity of this daemon, created once at registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Instance ID assigned by base
    pub id: String,

    /// Bootstrap credential exchanged for short-lived agent tokens
    pub bootstrap_token: String,

    #[serde(default)]
    pub issuer: Option<String>,

    #[serde(default)]
    pub audience: Option<String>,

    /// Base the instance registered with, when it differs from the settings
    #[serde(default)]
    pub base_url: Option<String>,

    pub registered_at: DateTime<Utc>,
}

/// Read access to the registered instance
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// The registered instance, if any
    async fn get_instance(&self) -> Result<Option<Instance>, AgentError>;

    /// The bootstrap token, if registered
    async fn get_token(&self) -> Result<Option<String>, AgentError> {
        Ok(self
            .get_instance()
            .await?
            .map(|instance| instance.bootstrap_token)
            .filter(|token| !token.is_empty()))
    }
}

/// Instance store reading `instance.json`
pub struct FileInstanceStore {
    file: File,
}

impl FileInstanceStore {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    /// Persist a freshly registered instance
    pub async fn save(&self, instance: &Instance) -> Result<(), AgentError> {
        self.file.write_json(instance).await
    }
}

#[async_trait]
impl InstanceStore for FileInstanceStore {
    async fn get_instance(&self) -> Result<Option<Instance>, AgentError> {
        self.file.read_json_opt().await
    }
}

/// Base URL to talk to: the one recorded at registration, else `fallback`
pub async fn resolve_base_url(store: &dyn InstanceStore, fallback: &str) -> String {
    match store.get_instance().await {
        Ok(Some(instance)) => match instance.base_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() && url != fallback => {
                info!("Using base URL {} recorded at registration", url);
                url.to_string()
            }
            _ => fallback.to_string(),
        },
        Ok(None) => fallback.to_string(),
        Err(e) => {
            warn!("Failed to read instance file, using configured base URL: {}", e);
            fallback.to_string()
        }
    }
}

/// Assert that the instance has been registered
pub async fn assert_registered(store: &dyn InstanceStore) -> Result<Instance, AgentError> {
    let instance = store
        .get_instance()
        .await?
        .ok_or_else(|| AgentError::NotRegistered("Instance file does not exist".to_string()))?;

    if instance.id.is_empty() {
        return Err(AgentError::NotRegistered("Instance ID is empty".to_string()));
    }

    if instance.bootstrap_token.is_empty() {
        return Err(AgentError::NotRegistered(
            "Bootstrap token is empty".to_string(),
        ));
    }

    Ok(instance)
}
