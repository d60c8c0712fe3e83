//! Directory handles for the storage layout and deployment workspaces

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::AgentError;
use crate::filesys::file::File;

#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory and any missing parents
    pub async fn create(&self) -> Result<(), AgentError> {
        fs::create_dir_all(&self.path).await.map_err(|e| {
            AgentError::StorageError(format!("failed to create {}: {}", self.path.display(), e))
        })
    }

    pub fn file(&self, name: &str) -> File {
        File::new(self.path.join(name))
    }

    pub fn subdir(&self, name: &str) -> Dir {
        Dir::new(self.path.join(name))
    }

    /// True when `name` exists below this directory and is itself a directory
    pub async fn contains_dir(&self, name: &str) -> bool {
        fs::metadata(self.path.join(name))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }
}
