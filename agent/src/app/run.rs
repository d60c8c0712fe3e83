//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::{AppState, DaemonState};
use crate::authn::token_provider::AgentTokenProvider;
use crate::deploy::deployer::Deployer;
use crate::deploy::pipeline::Pipeline;
use crate::deploy::runtime::VersionManager;
use crate::deploy::service_mngr::resolve_service_manager;
use crate::deploy::worker::Worker;
use crate::errors::AgentError;
use crate::http::client::HttpClient;
use crate::server::serve::{router, serve};
use crate::server::state::ServerState;
use crate::storage::deployments::FileDeploymentStore;
use crate::storage::instance::{assert_registered, resolve_base_url, FileInstanceStore};
use crate::storage::services::FileServiceStore;
use crate::storage::task_results::FileTaskResultStore;
use crate::sync::executor::TaskExecutor;
use crate::sync::syncer::TaskSyncer;
use crate::workers::poller;

/// Run the daemon until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    info!("Initializing deployd...");

    let shutdown = CancellationToken::new();
    let mut shutdown_manager = ShutdownManager::new(shutdown.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, &shutdown, &mut shutdown_manager).await {
        error!("Failed to start daemon: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown: &CancellationToken,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, AgentError> {
    let app_state = init_app_state(options).await?;
    shutdown_manager.with_app_state(app_state.clone())?;

    init_deployment_worker(app_state.worker.clone(), shutdown, shutdown_manager)?;

    if options.enable_socket_server {
        init_socket_server(options, &app_state, shutdown, shutdown_manager).await?;
    }

    if options.enable_syncer {
        if let Err(e) = assert_registered(app_state.instances.as_ref()).await {
            warn!("Syncer enabled but {}; cycles are skipped until registration", e);
        }
        init_poller_worker(options.poller.clone(), app_state.clone(), shutdown, shutdown_manager)?;
    }

    Ok(app_state)
}

async fn init_app_state(options: &AppOptions) -> Result<Arc<AppState>, AgentError> {
    let layout = &options.storage.layout;
    layout.setup().await?;

    let daemon = Arc::new(DaemonState::new());
    let instances = Arc::new(FileInstanceStore::new(layout.instance_file()));
    let deployments = Arc::new(FileDeploymentStore::open(layout.deployments_file()).await?);
    let services = Arc::new(FileServiceStore::open(layout.services_file()).await?);
    let task_results = Arc::new(FileTaskResultStore::open(layout.task_results_file()).await?);

    let base_url = resolve_base_url(instances.as_ref(), &options.base_url).await;
    let http_client = Arc::new(HttpClient::new(&base_url)?);
    let token_provider = Arc::new(AgentTokenProvider::new(
        http_client.clone(),
        options.token_cooldown.clone(),
    ));

    let pipeline = Arc::new(Pipeline::new(
        options.pipeline.clone(),
        options.git.clone(),
        VersionManager::new(options.version_manager.clone()),
        resolve_service_manager()?,
    ));
    let worker = Arc::new(Worker::new(
        &options.worker,
        deployments.clone(),
        services.clone(),
        pipeline,
    ));
    let deployer = Arc::new(Deployer::new(deployments.clone(), worker.clone()));

    let server_state = Arc::new(ServerState::new(
        daemon.clone(),
        deployments.clone(),
        services.clone(),
        deployer.clone(),
        worker.clone(),
    ));
    let executor = Arc::new(TaskExecutor::new(router(server_state), daemon.clone()));
    let syncer = Arc::new(TaskSyncer::new(
        options.syncer.clone(),
        daemon.clone(),
        instances.clone(),
        task_results.clone(),
        http_client.clone(),
        token_provider.clone(),
        executor.clone(),
    ));

    Ok(Arc::new(AppState {
        daemon,
        http_client,
        instances,
        deployments,
        services,
        task_results,
        token_provider,
        worker,
        deployer,
        executor,
        syncer,
    }))
}

fn init_deployment_worker(
    worker: Arc<Worker>,
    shutdown: &CancellationToken,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), AgentError> {
    info!("Initializing deployment worker...");
    let handle = tokio::spawn(worker.start(shutdown.clone()));
    shutdown_manager.with_deployment_worker_handle(handle)
}

fn init_poller_worker(
    options: poller::Options,
    app_state: Arc<AppState>,
    shutdown: &CancellationToken,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), AgentError> {
    info!("Initializing poller worker...");

    let syncer = app_state.syncer.clone();
    let daemon = app_state.daemon.clone();
    let shutdown = shutdown.clone();

    let poller_handle = tokio::spawn(async move {
        poller::run(
            &options,
            syncer.as_ref(),
            daemon.as_ref(),
            tokio::time::sleep,
            shutdown,
        )
        .await;
    });

    shutdown_manager.with_poller_worker_handle(poller_handle)
}

async fn init_socket_server(
    options: &AppOptions,
    app_state: &AppState,
    shutdown: &CancellationToken,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), AgentError> {
    info!("Initializing local HTTP server...");

    let server_state = ServerState::new(
        app_state.daemon.clone(),
        app_state.deployments.clone(),
        app_state.services.clone(),
        app_state.deployer.clone(),
        app_state.worker.clone(),
    );

    let server_handle = serve(
        &options.server,
        router(Arc::new(server_state)),
        shutdown.clone().cancelled_owned(),
    )
    .await?;

    shutdown_manager.with_socket_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown: CancellationToken,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    socket_server_handle: Option<JoinHandle<Result<(), AgentError>>>,
    poller_worker_handle: Option<JoinHandle<()>>,
    deployment_worker_handle: Option<JoinHandle<Result<(), AgentError>>>,
}

impl ShutdownManager {
    pub fn new(shutdown: CancellationToken, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown,
            lifecycle_options,
            app_state: None,
            socket_server_handle: None,
            poller_worker_handle: None,
            deployment_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), AgentError> {
        if self.app_state.is_some() {
            return Err(AgentError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_poller_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AgentError> {
        if self.poller_worker_handle.is_some() {
            return Err(AgentError::ShutdownError("poller_handle already set".to_string()));
        }
        self.poller_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_deployment_worker_handle(
        &mut self,
        handle: JoinHandle<Result<(), AgentError>>,
    ) -> Result<(), AgentError> {
        if self.deployment_worker_handle.is_some() {
            return Err(AgentError::ShutdownError(
                "deployment_worker_handle already set".to_string(),
            ));
        }
        self.deployment_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_socket_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), AgentError>>,
    ) -> Result<(), AgentError> {
        if self.socket_server_handle.is_some() {
            return Err(AgentError::ShutdownError("server_handle already set".to_string()));
        }
        self.socket_server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        self.shutdown.cancel();

        let max_delay = self.lifecycle_options.max_shutdown_delay;
        match tokio::time::timeout(max_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::ShutdownError(format!(
                "shutdown did not finish within {:?}",
                max_delay
            ))),
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), AgentError> {
        info!("Shutting down deployd...");

        // 1. Poller worker
        if let Some(handle) = self.poller_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))?;
        }

        // 2. Socket server
        if let Some(handle) = self.socket_server_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))??;
        }

        // 3. Deployment worker, which waits for running pipelines
        if let Some(handle) = self.deployment_worker_handle.take() {
            handle.await.map_err(|e| AgentError::ShutdownError(e.to_string()))??;
        }

        // 4. App state
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
