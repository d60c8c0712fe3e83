//! Multi-stage deployment pipeline
//!
//! Stages run in order and the first error aborts the run:
//! workspace setup, clone, runtime setup, dependency install and service
//! provisioning.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::deploy::command::{run_command, CommandSpec, BUILD_TIMEOUT, GIT_TIMEOUT};
use crate::deploy::git;
use crate::deploy::log::DeploymentLog;
use crate::deploy::runtime::{resolve_executable, Runtime, VersionManager};
use crate::deploy::service_mngr::{ServiceManager, ServiceSpec, ServiceStatus};
use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::models::deployment::{Blueprint, Deployment, SourceKind};
use crate::models::service::Service;
use crate::storage::settings::GitSettings;
use crate::utils::sanitize_name;

/// Runs one deployment end to end.
///
/// `Ok(None)` means the pipeline finished without provisioning a new service.
#[async_trait]
pub trait DeploymentPipeline: Send + Sync {
    async fn execute(
        &self,
        deployment: &Deployment,
        cancel: &CancellationToken,
    ) -> Result<Option<Service>, AgentError>;
}

/// Pipeline timeouts and paths
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Parent of every deployment workspace
    pub deployments_dir: PathBuf,

    /// Per-deployment log files
    pub logs_dir: PathBuf,

    /// Per git call
    pub git_timeout: Duration,

    pub runtime_timeout: Duration,

    /// Standalone build step
    pub build_timeout: Duration,

    /// Wait between stopping and removing an existing service
    pub stop_grace: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            deployments_dir: PathBuf::from("deployments"),
            logs_dir: PathBuf::from("logs/deployments"),
            git_timeout: GIT_TIMEOUT,
            runtime_timeout: GIT_TIMEOUT,
            build_timeout: BUILD_TIMEOUT,
            stop_grace: Duration::from_secs(2),
        }
    }
}

/// Per-run state threaded through the stages
struct Workspace {
    name: String,
    dir: PathBuf,
    log: DeploymentLog,
    runtime: Option<Runtime>,
    build_folded: bool,
}

impl Workspace {
    /// Directory the service runs in
    fn service_dir(&self, blueprint: &Blueprint) -> PathBuf {
        match blueprint.working_dir.as_deref().map(str::trim) {
            Some(sub) if !sub.is_empty() => self.dir.join(sub.trim_start_matches('/')),
            _ => self.dir.clone(),
        }
    }
}

pub struct Pipeline {
    options: PipelineOptions,
    git: Arc<GitSettings>,
    version_manager: VersionManager,
    service_manager: Arc<dyn ServiceManager>,
}

impl Pipeline {
    pub fn new(
        options: PipelineOptions,
        git: Arc<GitSettings>,
        version_manager: VersionManager,
        service_manager: Arc<dyn ServiceManager>,
    ) -> Self {
        Self {
            options,
            git,
            version_manager,
            service_manager,
        }
    }

    async fn setup_workspace(&self, deployment: &Deployment) -> Result<Workspace, AgentError> {
        let name = sanitize_name(&deployment.blueprint.name);
        if name.is_empty() {
            return Err(AgentError::ValidationError(format!(
                "deployment name {:?} has no usable characters",
                deployment.blueprint.name
            )));
        }
        let runtime = Runtime::from_spec(&deployment.blueprint.runtime)?;

        let dir = Dir::new(self.options.deployments_dir.join(&name));
        dir.create().await?;
        let logs = Dir::new(&self.options.logs_dir);
        logs.create().await?;
        let log = DeploymentLog::new(&deployment.id, logs.file(&format!("{}.log", deployment.id)));
        log.info(&format!(
            "Deployment {} of {} started in {}",
            deployment.id,
            deployment.blueprint.name,
            dir.path().display()
        ))
        .await;

        Ok(Workspace {
            name,
            dir: dir.path().to_path_buf(),
            log,
            runtime,
            build_folded: false,
        })
    }

    async fn clone(
        &self,
        blueprint: &Blueprint,
        ws: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        if let Some(remote) = &blueprint.remote {
            return git::sync_repository(
                remote,
                &ws.dir,
                &self.git,
                self.options.git_timeout,
                cancel,
                &ws.log,
            )
            .await;
        }

        if let Some(image) = image_of(blueprint) {
            ws.log.info(&format!("Pulling image {}", image)).await;
            return run_command(
                CommandSpec::new(
                    "docker pull",
                    "docker",
                    vec!["pull".to_string(), image.to_string()],
                    self.options.git_timeout,
                ),
                cancel,
                &ws.log,
            )
            .await;
        }

        ws.log.info("No remote configured, skipping clone").await;
        Ok(())
    }

    async fn setup_runtime(
        &self,
        blueprint: &Blueprint,
        ws: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<bool, AgentError> {
        let runtime = match ws.runtime.as_ref().filter(|r| r.kind.needs_install()) {
            Some(runtime) => runtime,
            None => {
                ws.log.info("No runtime to install").await;
                return Ok(false);
            }
        };

        ws.log
            .info(&format!("Installing runtime {}", runtime.tool()))
            .await;
        run_command(
            CommandSpec::new(
                "runtime install",
                self.version_manager.binary(),
                self.version_manager.install_args(runtime),
                self.options.runtime_timeout,
            ),
            cancel,
            &ws.log,
        )
        .await?;

        let build_cmd = blueprint.build_cmd.as_deref().filter(|c| !c.trim().is_empty());
        let script = self.version_manager.build_script(runtime, &ws.dir, build_cmd);
        if build_cmd.is_some() {
            ws.log.info("Running build with the runtime activated").await;
        }
        run_command(
            CommandSpec::shell("runtime setup", script, self.options.runtime_timeout)
                .cwd(&ws.dir)
                .env(&blueprint.env_vars),
            cancel,
            &ws.log,
        )
        .await?;
        Ok(build_cmd.is_some())
    }

    async fn install_dependencies(
        &self,
        blueprint: &Blueprint,
        ws: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        if ws.build_folded {
            return Ok(());
        }
        let build_cmd = match blueprint.build_cmd.as_deref().map(str::trim) {
            Some(cmd) if !cmd.is_empty() => cmd,
            _ => return Ok(()),
        };
        ws.log.info(&format!("Running build: {}", build_cmd)).await;
        run_command(
            CommandSpec::shell("build", build_cmd.to_string(), self.options.build_timeout)
                .cwd(&ws.dir)
                .env(&blueprint.env_vars),
            cancel,
            &ws.log,
        )
        .await
    }

    async fn provision_service(
        &self,
        deployment: &Deployment,
        ws: &Workspace,
    ) -> Result<Option<Service>, AgentError> {
        let blueprint = &deployment.blueprint;

        let status = self.service_manager.status(&ws.name).await?;
        if status.exists() {
            if status == ServiceStatus::Running {
                ws.log
                    .info(&format!("Stopping existing service {}", ws.name))
                    .await;
                self.service_manager.stop(&ws.name).await?;
            }
            tokio::time::sleep(self.options.stop_grace).await;
            self.service_manager.remove(&ws.name).await?;
            ws.log
                .info(&format!(
                    "Removed existing service {}; new service not installed",
                    ws.name
                ))
                .await;
            warn!(
                "Service {} already existed and was removed; deployment {} installs nothing",
                ws.name, deployment.id
            );
            return Ok(None);
        }

        let argv = match self.service_argv(blueprint, ws)? {
            Some(argv) => argv,
            None => {
                ws.log
                    .info("Nothing to run, skipping service installation")
                    .await;
                return Ok(None);
            }
        };

        let service_dir = ws.service_dir(blueprint);
        let mut env = blueprint.env_vars.clone();
        if let Some(port) = blueprint.port {
            env.entry("PORT".to_string()).or_insert_with(|| port.to_string());
        }
        let spec = ServiceSpec {
            name: ws.name.clone(),
            description: format!("{} (deployment {})", ws.name, deployment.id),
            argv,
            working_dir: service_dir.clone(),
            env,
        };

        ws.log.info(&format!("Installing service {}", ws.name)).await;
        self.service_manager.install(&spec).await?;
        self.service_manager.start(&ws.name).await?;
        ws.log.info(&format!("Service {} started", ws.name)).await;

        Ok(Some(Service::from_deployment(
            deployment,
            &ws.name,
            &service_dir.to_string_lossy(),
        )))
    }

    fn service_argv(
        &self,
        blueprint: &Blueprint,
        ws: &Workspace,
    ) -> Result<Option<Vec<String>>, AgentError> {
        let run_cmd = blueprint.run_cmd.trim();
        if !run_cmd.is_empty() {
            return self
                .version_manager
                .service_argv(ws.runtime.as_ref(), run_cmd)
                .map(Some);
        }

        if let Some(image) = image_of(blueprint) {
            let docker = resolve_executable("docker")?;
            let mut argv = vec![
                docker.to_string_lossy().to_string(),
                "run".to_string(),
                "--rm".to_string(),
                "--name".to_string(),
                ws.name.clone(),
            ];
            if let Some(port) = blueprint.port {
                argv.push("-p".to_string());
                argv.push(format!("{}:{}", port, port));
            }
            for (key, value) in &blueprint.env_vars {
                argv.push("-e".to_string());
                argv.push(format!("{}={}", key, value));
            }
            argv.push(image.to_string());
            return Ok(Some(argv));
        }

        Ok(None)
    }
}

fn image_of(blueprint: &Blueprint) -> Option<&str> {
    if blueprint.source != SourceKind::Image {
        return None;
    }
    blueprint.image.as_deref().filter(|i| !i.trim().is_empty())
}

/// Run one stage, prefixing its error with the stage name.
///
/// Timeouts and cancellation keep their variant so callers can tell them
/// apart from ordinary failures.
async fn stage<T, F>(name: &str, log: Option<&DeploymentLog>, fut: F) -> Result<T, AgentError>
where
    F: Future<Output = Result<T, AgentError>>,
{
    match fut.await {
        Ok(value) => Ok(value),
        Err(e) => {
            let wrapped = match e {
                AgentError::TimeoutError(msg) => {
                    AgentError::TimeoutError(format!("{} stage: {}", name, msg))
                }
                AgentError::Cancelled(msg) => AgentError::Cancelled(format!("{} stage: {}", name, msg)),
                other => AgentError::DeployError(format!("{} stage failed: {}", name, other)),
            };
            if let Some(log) = log {
                log.error(&wrapped.to_string()).await;
            }
            Err(wrapped)
        }
    }
}

#[async_trait]
impl DeploymentPipeline for Pipeline {
    async fn execute(
        &self,
        deployment: &Deployment,
        cancel: &CancellationToken,
    ) -> Result<Option<Service>, AgentError> {
        let blueprint = &deployment.blueprint;
        info!("Running pipeline for deployment {}", deployment.id);

        let mut ws = stage("workspace setup", None, self.setup_workspace(deployment)).await?;
        let result = async {
            stage("clone", Some(&ws.log), self.clone(blueprint, &ws, cancel)).await?;
            ws.build_folded = stage(
                "runtime setup",
                Some(&ws.log),
                self.setup_runtime(blueprint, &ws, cancel),
            )
            .await?;
            stage(
                "dependency install",
                Some(&ws.log),
                self.install_dependencies(blueprint, &ws, cancel),
            )
            .await?;
            stage(
                "service provisioning",
                Some(&ws.log),
                self.provision_service(deployment, &ws),
            )
            .await
        }
        .await;

        match &result {
            Ok(Some(service)) => {
                ws.log
                    .info(&format!("Deployment finished, service {}", service.name))
                    .await
            }
            Ok(None) => ws.log.info("Deployment finished").await,
            Err(e) => {
                error!("Deployment {} failed: {}", deployment.id, e);
            }
        }
        result
    }
}
