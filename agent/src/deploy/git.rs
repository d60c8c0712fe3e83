//! Git checkout of a deployment's remote

use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::deploy::command::{run_command, CommandSpec};
use crate::deploy::log::DeploymentLog;
use crate::errors::AgentError;
use crate::filesys::dir::Dir;
use crate::models::deployment::RemoteSpec;
use crate::storage::settings::GitSettings;

/// Git provider recognized by its host name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitProvider {
    GitHub,
    GitLab,
    Bitbucket,
}

impl GitProvider {
    pub fn from_host(host: &str) -> Option<Self> {
        match host.to_ascii_lowercase().as_str() {
            "github.com" | "www.github.com" => Some(GitProvider::GitHub),
            "gitlab.com" | "www.gitlab.com" => Some(GitProvider::GitLab),
            "bitbucket.org" | "www.bitbucket.org" => Some(GitProvider::Bitbucket),
            _ => None,
        }
    }

    /// User name each provider expects next to an access token
    pub fn token_user(&self) -> &'static str {
        match self {
            GitProvider::GitHub => "git",
            GitProvider::GitLab => "oauth2",
            GitProvider::Bitbucket => "x-token-auth",
        }
    }

    fn token<'a>(&self, settings: &'a GitSettings) -> Option<&'a SecretString> {
        match self {
            GitProvider::GitHub => settings.github_token.as_ref(),
            GitProvider::GitLab => settings.gitlab_token.as_ref(),
            GitProvider::Bitbucket => settings.bitbucket_token.as_ref(),
        }
    }
}

/// Inject the configured provider token into a remote URL.
///
/// The URL is returned unchanged when it cannot be parsed, already carries
/// credentials, belongs to an unknown host, or no token is configured for
/// its provider. Plain `http` remotes are upgraded to `https` before the
/// token is added.
pub fn build_auth_url(remote_url: &str, credentials: &GitSettings) -> String {
    let mut url = match Url::parse(remote_url) {
        Ok(url) => url,
        Err(_) => return remote_url.to_string(),
    };
    if !url.username().is_empty() || url.password().is_some() {
        return remote_url.to_string();
    }
    let provider = match url.host_str().and_then(GitProvider::from_host) {
        Some(provider) => provider,
        None => return remote_url.to_string(),
    };
    let token = match provider.token(credentials) {
        Some(token) if !token.expose_secret().is_empty() => token,
        _ => return remote_url.to_string(),
    };

    if url.scheme() == "http" && url.set_scheme("https").is_err() {
        return remote_url.to_string();
    }
    if url.set_username(provider.token_user()).is_err()
        || url.set_password(Some(token.expose_secret())).is_err()
    {
        return remote_url.to_string();
    }
    url.to_string()
}

/// Strip credentials from a URL before it is logged
pub fn redact_url(remote_url: &str) -> String {
    match Url::parse(remote_url) {
        Ok(mut url) if url.password().is_some() || !url.username().is_empty() => {
            let _ = url.set_password(None);
            let _ = url.set_username("");
            url.to_string()
        }
        _ => remote_url.to_string(),
    }
}

/// Clone or update `target_dir` from `remote`, then pin the commit if one is set.
///
/// An existing `.git` directory means the workspace already holds a checkout
/// and gets pulled instead of cloned.
pub async fn sync_repository(
    remote: &RemoteSpec,
    target_dir: &Path,
    credentials: &GitSettings,
    timeout: std::time::Duration,
    cancel: &CancellationToken,
    log: &DeploymentLog,
) -> Result<(), AgentError> {
    let auth_url = build_auth_url(&remote.url, credentials);
    let target = target_dir.to_string_lossy().to_string();
    info!(
        "Syncing git repository {} (branch: {}) into {}",
        redact_url(&remote.url),
        remote.branch,
        target
    );

    if Dir::new(target_dir).contains_dir(".git").await {
        debug!("Checkout exists, pulling updates");
        log.info(&format!("Pulling {} ({})", redact_url(&remote.url), remote.branch))
            .await;
        run_command(
            CommandSpec::new(
                "git remote set-url",
                "git",
                vec![
                    "remote".to_string(),
                    "set-url".to_string(),
                    "origin".to_string(),
                    auth_url,
                ],
                timeout,
            )
            .cwd(target_dir),
            cancel,
            log,
        )
        .await?;
        run_command(
            CommandSpec::new(
                "git pull",
                "git",
                vec![
                    "pull".to_string(),
                    "origin".to_string(),
                    remote.branch.clone(),
                ],
                timeout,
            )
            .cwd(target_dir),
            cancel,
            log,
        )
        .await?;
    } else {
        log.info(&format!("Cloning {} ({})", redact_url(&remote.url), remote.branch))
            .await;
        run_command(
            CommandSpec::new(
                "git clone",
                "git",
                vec![
                    "clone".to_string(),
                    "--branch".to_string(),
                    remote.branch.clone(),
                    auth_url,
                    target,
                ],
                timeout,
            ),
            cancel,
            log,
        )
        .await?;
    }

    if let Some(commit) = remote.commit_hash.as_deref().filter(|c| !c.is_empty()) {
        log.info(&format!("Checking out commit {}", commit)).await;
        run_command(
            CommandSpec::new(
                "git checkout",
                "git",
                vec!["checkout".to_string(), commit.to_string()],
                timeout,
            )
            .cwd(target_dir),
            cancel,
            log,
        )
        .await?;
    }

    info!("Successfully synced git repository");
    Ok(())
}
