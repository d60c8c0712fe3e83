//! Settings file management

use secrecy::SecretString;
use serde::Deserialize;

use crate::logs::LogLevel;

/// Daemon settings, read from `settings.json`
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON formatted logs
    #[serde(default)]
    pub log_json: bool,

    /// Base control plane configuration
    #[serde(default)]
    pub base: BaseSettings,

    /// Local HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Deployment worker configuration
    #[serde(default)]
    pub deployments: DeploymentSettings,

    /// Credentials injected into git remotes
    #[serde(default)]
    pub git: GitSettings,

    /// Enable the task syncer
    #[serde(default = "default_true")]
    pub enable_syncer: bool,

    /// Enable the local HTTP server
    #[serde(default = "default_true")]
    pub enable_socket_server: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            base: BaseSettings::default(),
            server: ServerSettings::default(),
            deployments: DeploymentSettings::default(),
            git: GitSettings::default(),
            enable_syncer: true,
            enable_socket_server: true,
        }
    }
}

/// Base control plane settings
#[derive(Debug, Clone, Deserialize)]
pub struct BaseSettings {
    /// Base URL of the control plane, without the `/v1` suffix
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Seconds between sync cycles (jittered by 10%)
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// API compatibility date announced on every status call
    #[serde(default = "default_compatibility_date")]
    pub compatibility_date: String,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_sync_interval() -> u64 {
    30
}

fn default_compatibility_date() -> String {
    "2026-01-01".to_string()
}

impl Default for BaseSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            sync_interval_secs: default_sync_interval(),
            compatibility_date: default_compatibility_date(),
        }
    }
}

/// Local HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7070
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Deployment worker settings
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentSettings {
    /// Maximum pipelines running at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Version manager binary used to install runtimes
    #[serde(default = "default_version_manager")]
    pub version_manager: String,
}

fn default_max_concurrent() -> usize {
    2
}

fn default_version_manager() -> String {
    "mise".to_string()
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            version_manager: default_version_manager(),
        }
    }
}

/// Per-provider access tokens for private repositories
#[derive(Debug, Default, Deserialize)]
pub struct GitSettings {
    #[serde(default)]
    pub github_token: Option<SecretString>,

    #[serde(default)]
    pub gitlab_token: Option<SecretString>,

    #[serde(default)]
    pub bitbucket_token: Option<SecretString>,
}
