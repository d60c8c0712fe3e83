//! Subprocess execution with a hard deadline and cancellation

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::deploy::git::redact_url;
use crate::deploy::log::DeploymentLog;
use crate::errors::AgentError;

/// Timeout for git operations and runtime installation
pub const GIT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Timeout for the standalone build step
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// One external command
#[derive(Debug, Clone)]
pub struct CommandSpec<'a> {
    /// Human readable label used in errors, e.g. `git clone`
    pub label: &'a str,
    pub program: &'a str,
    pub args: Vec<String>,
    pub cwd: Option<&'a Path>,
    pub env: Option<&'a BTreeMap<String, String>>,
    pub timeout: Duration,
}

impl<'a> CommandSpec<'a> {
    pub fn new(label: &'a str, program: &'a str, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            label,
            program,
            args,
            cwd: None,
            env: None,
            timeout,
        }
    }

    pub fn cwd(mut self, cwd: &'a Path) -> Self {
        self.cwd = Some(cwd);
        self
    }

    pub fn env(mut self, env: &'a BTreeMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// `bash -c <script>`
    pub fn shell(label: &'a str, script: String, timeout: Duration) -> Self {
        Self::new(label, "bash", vec!["-c".to_string(), script], timeout)
    }

    /// Arguments with credentials stripped from any URL
    fn redacted_args(&self) -> Vec<String> {
        self.args.iter().map(|arg| redact_url(arg)).collect()
    }

    /// Replace every credentialed argument echoed back in `text`
    fn scrub(&self, text: &str) -> String {
        let mut scrubbed = text.to_string();
        for arg in &self.args {
            let redacted = redact_url(arg);
            if redacted != *arg {
                scrubbed = scrubbed.replace(arg.as_str(), &redacted);
            }
        }
        scrubbed
    }
}

/// Run a command to completion.
///
/// The child is killed when the deadline passes or `cancel` fires. Output is
/// copied into the deployment log. Timeouts are reported as
/// [`AgentError::TimeoutError`] so callers can tell them apart.
pub async fn run_command(
    spec: CommandSpec<'_>,
    cancel: &CancellationToken,
    log: &DeploymentLog,
) -> Result<(), AgentError> {
    debug!(
        "Running {}: {} {:?}",
        spec.label,
        spec.program,
        spec.redacted_args()
    );

    let mut command = Command::new(spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = spec.cwd {
        command.current_dir(cwd);
    }
    if let Some(env) = spec.env {
        command.envs(env);
    }
    // Never block on a credential prompt
    command.env("GIT_TERMINAL_PROMPT", "0");

    let output = tokio::select! {
        _ = cancel.cancelled() => {
            return Err(AgentError::Cancelled(format!("{} interrupted by shutdown", spec.label)));
        }
        result = tokio::time::timeout(spec.timeout, command.output()) => match result {
            Err(_) => {
                return Err(AgentError::TimeoutError(format!(
                    "{} did not finish within {:?}",
                    spec.label, spec.timeout
                )));
            }
            Ok(Err(e)) => {
                return Err(AgentError::DeployError(format!("failed to start {}: {}", spec.label, e)));
            }
            Ok(Ok(output)) => output,
        },
    };

    let stdout = spec.scrub(&String::from_utf8_lossy(&output.stdout));
    let stderr = spec.scrub(&String::from_utf8_lossy(&output.stderr));
    log.output("stdout", &stdout).await;
    log.output("stderr", &stderr).await;

    if !output.status.success() {
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        return Err(AgentError::DeployError(format!(
            "{} exited with {}: {}",
            spec.label,
            output.status,
            tail.join(" | ")
        )));
    }

    Ok(())
}
