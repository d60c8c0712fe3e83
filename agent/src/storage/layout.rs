//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout for the daemon
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Registered instance credentials
    pub fn instance_file(&self) -> File {
        File::new(self.base_dir.join("instance.json"))
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Directory holding the JSON tables
    pub fn db_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("db"))
    }

    pub fn deployments_file(&self) -> File {
        self.db_dir().file("deployments.json")
    }

    pub fn services_file(&self) -> File {
        self.db_dir().file("services.json")
    }

    /// Outbox of task results not yet acknowledged by base
    pub fn task_results_file(&self) -> File {
        self.db_dir().file("task_results.json")
    }

    /// Per-deployment workspaces
    pub fn deployment_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("deployments"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Per-deployment log files
    pub fn deployment_logs_dir(&self) -> Dir {
        self.logs_dir().subdir("deployments")
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), AgentError> {
        self.db_dir().create().await?;
        self.deployment_dir().create().await?;
        self.logs_dir().create().await?;
        self.deployment_logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/etc/deployd");

        #[cfg(not(target_os = "linux"))]
        let base_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".deployd");

        Self::new(base_dir)
    }
}
