//! Task synchronization with base
//!
//! Each cycle reports status together with every unacknowledged task
//! result, marks those results synced once base accepted the report, then
//! executes the tasks base handed back. Their results are stored and go out
//! with the next cycle, so delivery is at-least-once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use openapi_client::models::{StatusRequest, TaskResult};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::state::{DaemonMode, DaemonState};
use crate::authn::token_provider::AgentTokenProvider;
use crate::errors::AgentError;
use crate::http::client::HttpClient;
use crate::storage::instance::InstanceStore;
use crate::storage::task_results::TaskResultStore;
use crate::sync::executor::TaskExecutor;
use crate::telemetry::collect_system_info;

/// Sync state
#[derive(Debug, Clone, Serialize)]
pub struct SyncState {
    pub last_attempted_sync_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub err_streak: u32,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            last_attempted_sync_at: None,
            last_synced_at: None,
            err_streak: 0,
        }
    }
}

/// Syncer options
#[derive(Debug, Clone)]
pub struct Options {
    /// Daemon version reported to base
    pub version: String,

    pub compatibility_date: String,

    /// How long acknowledged results are kept before pruning
    pub retention: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            compatibility_date: "2026-01-01".to_string(),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// What a single cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing was sent
    Skipped(&'static str),
    Synced {
        /// Results base acknowledged this cycle
        acknowledged: usize,
        /// Tasks received and executed this cycle
        executed: usize,
    },
}

pub struct TaskSyncer {
    options: Options,
    daemon: Arc<DaemonState>,
    instances: Arc<dyn InstanceStore>,
    task_results: Arc<dyn TaskResultStore>,
    http_client: Arc<HttpClient>,
    token_provider: Arc<AgentTokenProvider>,
    executor: Arc<TaskExecutor>,
}

impl TaskSyncer {
    pub fn new(
        options: Options,
        daemon: Arc<DaemonState>,
        instances: Arc<dyn InstanceStore>,
        task_results: Arc<dyn TaskResultStore>,
        http_client: Arc<HttpClient>,
        token_provider: Arc<AgentTokenProvider>,
        executor: Arc<TaskExecutor>,
    ) -> Self {
        Self {
            options,
            daemon,
            instances,
            task_results,
            http_client,
            token_provider,
            executor,
        }
    }

    /// Run one cycle and record its outcome in the daemon's sync state
    pub async fn sync_once(&self, cancel: &CancellationToken) -> Result<SyncOutcome, AgentError> {
        self.daemon
            .update_sync_state(|state| state.last_attempted_sync_at = Some(Utc::now()));

        match self.sync_impl(cancel).await {
            Ok(outcome) => {
                if let SyncOutcome::Synced {
                    acknowledged,
                    executed,
                } = &outcome
                {
                    self.daemon.update_sync_state(|state| {
                        state.last_synced_at = Some(Utc::now());
                        state.err_streak = 0;
                    });
                    info!(
                        "Sync completed ({} results acknowledged, {} tasks executed)",
                        acknowledged, executed
                    );
                }
                Ok(outcome)
            }
            Err(AgentError::Cancelled(reason)) => Err(AgentError::Cancelled(reason)),
            Err(e) => {
                let mut streak = 0;
                self.daemon.update_sync_state(|state| {
                    state.err_streak = state.err_streak.saturating_add(1);
                    streak = state.err_streak;
                });
                error!("Sync failed (attempt {}): {}", streak, e);
                Err(e)
            }
        }
    }

    async fn sync_impl(&self, cancel: &CancellationToken) -> Result<SyncOutcome, AgentError> {
        if self.daemon.mode() == DaemonMode::Updating {
            debug!("Daemon is updating, skipping sync");
            return Ok(SyncOutcome::Skipped("updating"));
        }

        let instance = match self.instances.get_instance().await? {
            Some(instance) if !instance.bootstrap_token.is_empty() => instance,
            _ => {
                debug!("Instance not registered, skipping sync");
                return Ok(SyncOutcome::Skipped("not registered"));
            }
        };

        let agent_token = self
            .token_provider
            .obtain_agent_token_with_backoff(&instance.bootstrap_token, cancel)
            .await?;

        let system = tokio::task::spawn_blocking(collect_system_info)
            .await
            .map_err(|e| AgentError::Internal(format!("system info task failed: {}", e)))?;
        let unsent = self.task_results.list_unsent().await?;
        let sent_ids: Vec<String> = unsent.iter().map(|r| r.id.clone()).collect();
        let request = StatusRequest {
            version: self.options.version.clone(),
            compatibility_date: self.options.compatibility_date.clone(),
            system,
            completed_tasks: unsent,
        };

        debug!("Reporting status with {} completed tasks", sent_ids.len());
        let tasks = self
            .http_client
            .report_status(&instance.id, &agent_token, &request)
            .await?;

        // Base accepted the report, so everything in it is acknowledged
        if !sent_ids.is_empty() {
            self.task_results.mark_synced(&sent_ids).await?;
        }
        self.prune_acknowledged().await;

        if !tasks.is_empty() {
            info!("Received {} tasks from base", tasks.len());
        }
        let mut results: Vec<TaskResult> = Vec::with_capacity(tasks.len());
        for task in &tasks {
            let result = self.executor.execute(task).await;
            if let Some(err) = &result.error {
                warn!("Task {} ({}) failed: {}", task.id, task.kind, err);
            }
            results.push(result);
        }
        if !results.is_empty() {
            self.task_results.save_results(&results).await?;
        }

        Ok(SyncOutcome::Synced {
            acknowledged: sent_ids.len(),
            executed: results.len(),
        })
    }

    async fn prune_acknowledged(&self) {
        let retention = match chrono::Duration::from_std(self.options.retention) {
            Ok(retention) => retention,
            Err(_) => return,
        };
        match self.task_results.prune_synced(Utc::now() - retention).await {
            Ok(0) => {}
            Ok(pruned) => debug!("Pruned {} acknowledged task results", pruned),
            Err(e) => warn!("Failed to prune task results: {}", e),
        }
    }
}
