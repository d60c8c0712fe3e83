//! Per-deployment log stream
//!
//! Stage progress and root causes go here; the deployment status itself only
//! records completed/failed.

use chrono::Utc;
use tracing::warn;

use crate::filesys::file::File;

pub struct DeploymentLog {
    deployment_id: String,
    file: File,
}

impl DeploymentLog {
    pub fn new(deployment_id: &str, file: File) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            file,
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub async fn info(&self, message: &str) {
        self.write("INFO", message).await;
    }

    pub async fn error(&self, message: &str) {
        self.write("ERROR", message).await;
    }

    /// Subprocess output, line by line
    pub async fn output(&self, stream: &str, text: &str) {
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            self.write(stream, line).await;
        }
    }

    async fn write(&self, level: &str, message: &str) {
        let line = format!("{} {:<6} {}", Utc::now().to_rfc3339(), level, message);
        // A broken log file must not fail the deployment
        if let Err(e) = self.file.append_line(&line).await {
            warn!(
                "Failed to write log for deployment {}: {}",
                self.deployment_id, e
            );
        }
    }
}
