//! Server state

use std::sync::Arc;

use crate::app::state::DaemonState;
use crate::deploy::deployer::Deployer;
use crate::deploy::worker::Worker;
use crate::storage::deployments::DeploymentStore;
use crate::storage::services::ServiceStore;

/// Server state shared across handlers
pub struct ServerState {
    pub daemon: Arc<DaemonState>,
    pub deployments: Arc<dyn DeploymentStore>,
    pub services: Arc<dyn ServiceStore>,
    pub deployer: Arc<Deployer>,
    pub worker: Arc<Worker>,
}

impl ServerState {
    pub fn new(
        daemon: Arc<DaemonState>,
        deployments: Arc<dyn DeploymentStore>,
        services: Arc<dyn ServiceStore>,
        deployer: Arc<Deployer>,
        worker: Arc<Worker>,
    ) -> Self {
        Self {
            daemon,
            deployments,
            services,
            deployer,
            worker,
        }
    }
}
