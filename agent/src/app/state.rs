//! Application state management

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::info;

use crate::authn::token_provider::AgentTokenProvider;
use crate::deploy::deployer::Deployer;
use crate::deploy::worker::Worker;
use crate::errors::AgentError;
use crate::http::client::HttpClient;
use crate::storage::deployments::DeploymentStore;
use crate::storage::instance::InstanceStore;
use crate::storage::services::ServiceStore;
use crate::storage::task_results::TaskResultStore;
use crate::sync::executor::TaskExecutor;
use crate::sync::syncer::{SyncState, TaskSyncer};

/// What the daemon is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonMode {
    Running,
    /// Self-update in progress; sync cycles are skipped
    Updating,
}

impl DaemonMode {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => DaemonMode::Updating,
            _ => DaemonMode::Running,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            DaemonMode::Running => 0,
            DaemonMode::Updating => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonMode::Running => "running",
            DaemonMode::Updating => "updating",
        }
    }
}

/// Mode and counters shared by the syncer, the executor and the server
pub struct DaemonState {
    mode: AtomicU8,
    tasks_in_flight: AtomicI64,
    tasks_executed: AtomicU64,
    tasks_failed: AtomicU64,
    sync_requested: Notify,
    sync_state: RwLock<SyncState>,
}

impl DaemonState {
    pub fn new() -> Self {
        Self {
            mode: AtomicU8::new(DaemonMode::Running.as_u8()),
            tasks_in_flight: AtomicI64::new(0),
            tasks_executed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            sync_requested: Notify::new(),
            sync_state: RwLock::new(SyncState::default()),
        }
    }

    pub fn mode(&self) -> DaemonMode {
        DaemonMode::from_u8(self.mode.load(Ordering::SeqCst))
    }

    /// Entry point for a self-update driver; sync cycles are skipped while updating
    pub fn set_mode(&self, mode: DaemonMode) {
        let previous = DaemonMode::from_u8(self.mode.swap(mode.as_u8(), Ordering::SeqCst));
        if previous != mode {
            info!("Daemon mode changed: {} -> {}", previous.as_str(), mode.as_str());
        }
    }

    /// Gauge of tasks currently executing
    pub fn tasks_in_flight(&self) -> i64 {
        self.tasks_in_flight.load(Ordering::SeqCst)
    }

    pub fn tasks_executed(&self) -> u64 {
        self.tasks_executed.load(Ordering::SeqCst)
    }

    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed.load(Ordering::SeqCst)
    }

    pub(crate) fn task_started(&self) {
        self.tasks_in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn task_finished(&self, failed: bool) {
        self.tasks_in_flight.fetch_sub(1, Ordering::SeqCst);
        self.tasks_executed.fetch_add(1, Ordering::SeqCst);
        if failed {
            self.tasks_failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Ask the poller to run a sync cycle now
    pub fn request_sync(&self) {
        self.sync_requested.notify_one();
    }

    /// Resolves when [`DaemonState::request_sync`] is called
    pub async fn sync_requested(&self) {
        self.sync_requested.notified().await;
    }

    pub fn sync_state(&self) -> SyncState {
        match self.sync_state.read() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn update_sync_state(&self, f: impl FnOnce(&mut SyncState)) {
        match self.sync_state.write() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl Default for DaemonState {
    fn default() -> Self {
        Self::new()
    }
}

/// Main application state
pub struct AppState {
    pub daemon: Arc<DaemonState>,

    /// HTTP client for base communication
    pub http_client: Arc<HttpClient>,

    pub instances: Arc<dyn InstanceStore>,

    pub deployments: Arc<dyn DeploymentStore>,

    pub services: Arc<dyn ServiceStore>,

    pub task_results: Arc<dyn TaskResultStore>,

    pub token_provider: Arc<AgentTokenProvider>,

    /// Deployment worker
    pub worker: Arc<Worker>,

    pub deployer: Arc<Deployer>,

    /// Dispatches remote tasks into the local router
    pub executor: Arc<TaskExecutor>,

    /// Task syncer
    pub syncer: Arc<TaskSyncer>,
}

impl AppState {
    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), AgentError> {
        info!(
            "Shutting down application state ({} deployments still running)...",
            self.worker.active_count()
        );
        Ok(())
    }
}
