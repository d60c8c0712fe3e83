//! Bounded-concurrency deployment worker
//!
//! Deployment ids flow through a bounded queue into a single dispatch loop.
//! The loop skips ids that are already active, waits for a slot on the
//! semaphore and spawns the pipeline for each accepted id.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::deploy::pipeline::DeploymentPipeline;
use crate::deploy::semaphore::{Permit, Semaphore};
use crate::errors::AgentError;
use crate::models::deployment::DeploymentStatus;
use crate::storage::deployments::DeploymentStore;
use crate::storage::services::ServiceStore;

/// Worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Pipelines allowed to run at once
    pub max_concurrent: usize,

    /// Capacity of the submission queue
    pub queue_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            queue_capacity: 100,
        }
    }
}

pub struct Worker {
    tx: mpsc::Sender<String>,
    rx: Mutex<Option<mpsc::Receiver<String>>>,
    semaphore: Semaphore,
    active_jobs: RwLock<HashSet<String>>,
    deployments: Arc<dyn DeploymentStore>,
    services: Arc<dyn ServiceStore>,
    pipeline: Arc<dyn DeploymentPipeline>,
}

impl Worker {
    pub fn new(
        options: &Options,
        deployments: Arc<dyn DeploymentStore>,
        services: Arc<dyn ServiceStore>,
        pipeline: Arc<dyn DeploymentPipeline>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            semaphore: Semaphore::new(options.max_concurrent),
            active_jobs: RwLock::new(HashSet::new()),
            deployments,
            services,
            pipeline,
        }
    }

    /// Queue a deployment id. Waits while the queue is full.
    pub async fn submit(&self, id: &str) -> Result<(), AgentError> {
        debug!("Submitting deployment {}", id);
        self.tx
            .send(id.to_string())
            .await
            .map_err(|_| AgentError::DeployError("deployment worker is not running".to_string()))
    }

    /// True while `id` waits for a slot or its pipeline runs
    pub fn is_running(&self, id: &str) -> bool {
        match self.active_jobs.read() {
            Ok(active) => active.contains(id),
            Err(poisoned) => poisoned.into_inner().contains(id),
        }
    }

    /// Returns false when `id` was already active
    pub fn mark_active(&self, id: &str) -> bool {
        match self.active_jobs.write() {
            Ok(mut active) => active.insert(id.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(id.to_string()),
        }
    }

    pub fn mark_inactive(&self, id: &str) {
        match self.active_jobs.write() {
            Ok(mut active) => active.remove(id),
            Err(poisoned) => poisoned.into_inner().remove(id),
        };
    }

    /// Ids waiting for a slot or running
    pub fn active_count(&self) -> usize {
        match self.active_jobs.read() {
            Ok(active) => active.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Ids submitted but not yet picked up by the dispatch loop
    pub fn queued_count(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available()
    }

    /// Run the dispatch loop until `cancel` fires.
    ///
    /// Pipelines still running at that point observe the same token and are
    /// awaited before this returns.
    pub async fn start(self: Arc<Self>, cancel: CancellationToken) -> Result<(), AgentError> {
        let mut rx = self.rx.lock().await.take().ok_or_else(|| {
            AgentError::DeployError("deployment worker already started".to_string())
        })?;
        info!(
            "Deployment worker started ({} slots)",
            self.semaphore.capacity()
        );

        let mut jobs = JoinSet::new();
        loop {
            let id = tokio::select! {
                _ = cancel.cancelled() => break,
                Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                    if let Err(e) = joined {
                        error!("Deployment task panicked: {}", e);
                    }
                    continue;
                }
                received = rx.recv() => match received {
                    Some(id) => id,
                    None => break,
                },
            };

            if !self.mark_active(&id) {
                info!("Deployment {} is already running, skipping", id);
                continue;
            }

            let permit = match self.semaphore.acquire(&cancel).await {
                Ok(permit) => permit,
                Err(e) => {
                    self.mark_inactive(&id);
                    debug!("Stopped waiting for a slot for {}: {}", id, e);
                    break;
                }
            };

            let worker = self.clone();
            let job_cancel = cancel.clone();
            jobs.spawn(async move {
                worker.run_job(id, permit, job_cancel).await;
            });
        }

        info!(
            "Deployment worker stopping, waiting for {} running pipelines",
            jobs.len()
        );
        while let Some(joined) = jobs.join_next().await {
            if let Err(e) = joined {
                error!("Deployment task panicked: {}", e);
            }
        }
        info!("Deployment worker stopped");
        Ok(())
    }

    async fn run_job(&self, id: String, permit: Permit, cancel: CancellationToken) {
        if let Err(e) = self.process(&id, &cancel).await {
            error!("Deployment {} failed: {}", id, e);
        }
        self.mark_inactive(&id);
        permit.release();
    }

    async fn process(&self, id: &str, cancel: &CancellationToken) -> Result<(), AgentError> {
        let deployment = self
            .deployments
            .update_deployment_status(id, DeploymentStatus::InProgress)
            .await?;
        info!(
            "Deploying {} ({})",
            deployment.blueprint.name, deployment.id
        );

        match self.pipeline.execute(&deployment, cancel).await {
            Ok(service) => {
                if let Some(service) = service {
                    if let Err(e) = self.services.create_service(&service).await {
                        self.fail(id).await;
                        return Err(e);
                    }
                } else {
                    warn!("Deployment {} completed without installing a service", id);
                }
                self.deployments
                    .update_deployment_status(id, DeploymentStatus::Completed)
                    .await?;
                info!("Deployment {} completed", id);
                Ok(())
            }
            Err(e) => {
                self.fail(id).await;
                Err(e)
            }
        }
    }

    async fn fail(&self, id: &str) {
        if let Err(e) = self
            .deployments
            .update_deployment_status(id, DeploymentStatus::Failed)
            .await
        {
            error!("Failed to mark deployment {} as failed: {}", id, e);
        }
    }
}
