//! Application configuration options

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::deploy::pipeline::PipelineOptions;
use crate::deploy::worker;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{GitSettings, Settings};
use crate::sync::syncer;
use crate::utils::CooldownOptions;
use crate::workers::poller;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Base control plane URL
    pub base_url: String,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Enable local HTTP server
    pub enable_socket_server: bool,

    /// Enable the task syncer
    pub enable_syncer: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Poller worker options
    pub poller: poller::Options,

    /// Syncer options
    pub syncer: syncer::Options,

    /// Agent token backoff
    pub token_cooldown: CooldownOptions,

    /// Deployment worker options
    pub worker: worker::Options,

    /// Deployment pipeline timeouts
    pub pipeline: PipelineOptions,

    /// Version manager binary used for runtimes
    pub version_manager: String,

    /// Git provider credentials
    pub git: Arc<GitSettings>,
}

impl Default for AppOptions {
    fn default() -> Self {
        let storage = StorageOptions::default();
        Self {
            lifecycle: LifecycleOptions::default(),
            base_url: "http://localhost:8000".to_string(),
            pipeline: storage.pipeline_options(),
            storage,
            enable_socket_server: true,
            enable_syncer: true,
            server: ServerOptions::default(),
            poller: poller::Options::default(),
            syncer: syncer::Options::default(),
            token_cooldown: CooldownOptions::default(),
            worker: worker::Options::default(),
            version_manager: "mise".to_string(),
            git: Arc::new(GitSettings::default()),
        }
    }
}

impl AppOptions {
    /// Build options from the settings file, keeping defaults for the rest
    pub fn from_settings(settings: Settings, layout: StorageLayout) -> Self {
        let storage = StorageOptions { layout };
        Self {
            base_url: settings.base.base_url,
            pipeline: storage.pipeline_options(),
            storage,
            enable_socket_server: settings.enable_socket_server,
            enable_syncer: settings.enable_syncer,
            server: ServerOptions {
                host: settings.server.host,
                port: settings.server.port,
            },
            poller: poller::Options {
                interval: Duration::from_secs(settings.base.sync_interval_secs.max(1)),
                ..Default::default()
            },
            syncer: syncer::Options {
                compatibility_date: settings.base.compatibility_date,
                ..Default::default()
            },
            worker: worker::Options {
                max_concurrent: settings.deployments.max_concurrent.max(1),
                ..Default::default()
            },
            version_manager: settings.deployments.version_manager,
            git: Arc::new(settings.git),
            ..Default::default()
        }
    }
}

/// Lifecycle options for the daemon
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,
}

impl StorageOptions {
    fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            deployments_dir: PathBuf::from(self.layout.deployment_dir().path()),
            logs_dir: PathBuf::from(self.layout.deployment_logs_dir().path()),
            ..Default::default()
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7070,
        }
    }
}
