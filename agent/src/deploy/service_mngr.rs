//! OS service managers that keep deployed services running

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::AgentError;

/// Deadline for a single service manager call
const MANAGER_TIMEOUT: Duration = Duration::from_secs(60);

/// Prefix of every unit/label the daemon creates
pub const SERVICE_PREFIX: &str = "deployd";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    NotInstalled,
    Running,
    Stopped,
}

impl ServiceStatus {
    pub fn exists(&self) -> bool {
        !matches!(self, ServiceStatus::NotInstalled)
    }
}

/// Everything needed to install a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub description: String,
    /// Absolute executable followed by its arguments
    pub argv: Vec<String>,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn status(&self, name: &str) -> Result<ServiceStatus, AgentError>;

    async fn install(&self, spec: &ServiceSpec) -> Result<(), AgentError>;

    async fn start(&self, name: &str) -> Result<(), AgentError>;

    async fn stop(&self, name: &str) -> Result<(), AgentError>;

    async fn remove(&self, name: &str) -> Result<(), AgentError>;
}

/// Pick the service manager of the current platform
pub fn resolve_service_manager() -> Result<Arc<dyn ServiceManager>, AgentError> {
    if cfg!(target_os = "linux") {
        Ok(Arc::new(Systemd::default()))
    } else if cfg!(target_os = "macos") {
        let home = dirs::home_dir().ok_or_else(|| {
            AgentError::ServiceError("cannot determine the home directory".to_string())
        })?;
        Ok(Arc::new(Launchd::new(home.join("Library").join("LaunchAgents"))))
    } else {
        Err(AgentError::ServiceError(format!(
            "no service manager for {}",
            std::env::consts::OS
        )))
    }
}

async fn exec(program: &str, args: &[&str]) -> Result<Output, AgentError> {
    debug!("Running {} {:?}", program, args);
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    match tokio::time::timeout(MANAGER_TIMEOUT, command.output()).await {
        Err(_) => Err(AgentError::TimeoutError(format!(
            "{} {} did not finish within {:?}",
            program,
            args.join(" "),
            MANAGER_TIMEOUT
        ))),
        Ok(Err(e)) => Err(AgentError::ServiceError(format!(
            "failed to run {}: {}",
            program, e
        ))),
        Ok(Ok(output)) => Ok(output),
    }
}

async fn exec_checked(program: &str, args: &[&str]) -> Result<(), AgentError> {
    let output = exec(program, args).await?;
    if !output.status.success() {
        return Err(AgentError::ServiceError(format!(
            "{} {} failed: {}",
            program,
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

async fn write_file(path: &Path, contents: String) -> Result<(), AgentError> {
    crate::filesys::file::File::new(path)
        .write_atomic(contents.as_bytes())
        .await
}

/// systemd backend: one unit file per service plus `systemctl`
#[derive(Debug, Clone)]
pub struct Systemd {
    unit_dir: PathBuf,
}

impl Default for Systemd {
    fn default() -> Self {
        Self::new(PathBuf::from("/etc/systemd/system"))
    }
}

impl Systemd {
    pub fn new(unit_dir: PathBuf) -> Self {
        Self { unit_dir }
    }

    pub fn unit_name(name: &str) -> String {
        format!("{}-{}.service", SERVICE_PREFIX, name)
    }

    fn unit_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(Self::unit_name(name))
    }

    /// Render the unit file for `spec`
    pub fn render_unit(spec: &ServiceSpec) -> String {
        let exec_start = spec
            .argv
            .iter()
            .map(|arg| systemd_quote(arg))
            .collect::<Vec<_>>()
            .join(" ");
        let mut unit = format!(
            "[Unit]\nDescription={}\nAfter=network-online.target\nWants=network-online.target\n\n\
             [Service]\nType=simple\nWorkingDirectory={}\nExecStart={}\nRestart=on-failure\nRestartSec=5\n",
            single_line(&spec.description),
            spec.working_dir.to_string_lossy(),
            exec_start
        );
        for (key, value) in &spec.env {
            unit.push_str(&format!("Environment={}\n", systemd_quote(&format!("{}={}", key, value))));
        }
        unit.push_str("\n[Install]\nWantedBy=multi-user.target\n");
        unit
    }
}

/// Quote one word of a unit file line.
///
/// Control characters become C escapes so a value can never end the line.
fn systemd_quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "\"'\\$%;".contains(c));
    if !needs_quotes {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '$' => quoted.push_str("$$"),
            '%' => quoted.push_str("%%"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c if c.is_control() => quoted.push_str(&format!("\\x{:02x}", c as u32)),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Free text fields such as `Description=` take no quoting; flatten them
fn single_line(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .replace('%', "%%")
}

#[async_trait]
impl ServiceManager for Systemd {
    async fn status(&self, name: &str) -> Result<ServiceStatus, AgentError> {
        if !self.unit_path(name).exists() {
            return Ok(ServiceStatus::NotInstalled);
        }
        let output = exec("systemctl", &["is-active", &Self::unit_name(name)]).await?;
        if output.status.success() {
            Ok(ServiceStatus::Running)
        } else {
            Ok(ServiceStatus::Stopped)
        }
    }

    async fn install(&self, spec: &ServiceSpec) -> Result<(), AgentError> {
        info!("Installing systemd unit {}", Self::unit_name(&spec.name));
        write_file(&self.unit_path(&spec.name), Self::render_unit(spec)).await?;
        exec_checked("systemctl", &["daemon-reload"]).await?;
        exec_checked("systemctl", &["enable", &Self::unit_name(&spec.name)]).await
    }

    async fn start(&self, name: &str) -> Result<(), AgentError> {
        exec_checked("systemctl", &["start", &Self::unit_name(name)]).await
    }

    async fn stop(&self, name: &str) -> Result<(), AgentError> {
        exec_checked("systemctl", &["stop", &Self::unit_name(name)]).await
    }

    async fn remove(&self, name: &str) -> Result<(), AgentError> {
        let unit = Self::unit_name(name);
        info!("Removing systemd unit {}", unit);
        // Disabling an already disabled unit fails; removal goes on regardless
        let _ = exec("systemctl", &["disable", &unit]).await?;
        let path = self.unit_path(name);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        exec_checked("systemctl", &["daemon-reload"]).await
    }
}

/// launchd backend: one plist per service plus `launchctl`
#[derive(Debug, Clone)]
pub struct Launchd {
    agents_dir: PathBuf,
}

impl Launchd {
    pub fn new(agents_dir: PathBuf) -> Self {
        Self { agents_dir }
    }

    pub fn label(name: &str) -> String {
        format!("dev.{}.{}", SERVICE_PREFIX, name)
    }

    fn plist_path(&self, name: &str) -> PathBuf {
        self.agents_dir.join(format!("{}.plist", Self::label(name)))
    }

    /// Render the launch agent plist for `spec`
    pub fn render_plist(spec: &ServiceSpec) -> String {
        let args: String = spec
            .argv
            .iter()
            .map(|arg| format!("    <string>{}</string>\n", xml_escape(arg)))
            .collect();
        let env: String = spec
            .env
            .iter()
            .map(|(k, v)| {
                format!(
                    "    <key>{}</key>\n    <string>{}</string>\n",
                    xml_escape(k),
                    xml_escape(v)
                )
            })
            .collect();
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n\
             <plist version=\"1.0\">\n<dict>\n\
             \x20 <key>Label</key>\n  <string>{}</string>\n\
             \x20 <key>ProgramArguments</key>\n  <array>\n{}  </array>\n\
             \x20 <key>WorkingDirectory</key>\n  <string>{}</string>\n\
             \x20 <key>EnvironmentVariables</key>\n  <dict>\n{}  </dict>\n\
             \x20 <key>RunAtLoad</key>\n  <true/>\n\
             \x20 <key>KeepAlive</key>\n  <true/>\n\
             </dict>\n</plist>\n",
            xml_escape(&Self::label(&spec.name)),
            args,
            xml_escape(&spec.working_dir.to_string_lossy()),
            env
        )
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[async_trait]
impl ServiceManager for Launchd {
    async fn status(&self, name: &str) -> Result<ServiceStatus, AgentError> {
        if !self.plist_path(name).exists() {
            return Ok(ServiceStatus::NotInstalled);
        }
        let output = exec("launchctl", &["list", &Self::label(name)]).await?;
        let listing = String::from_utf8_lossy(&output.stdout);
        if output.status.success() && listing.contains("\"PID\"") {
            Ok(ServiceStatus::Running)
        } else {
            Ok(ServiceStatus::Stopped)
        }
    }

    async fn install(&self, spec: &ServiceSpec) -> Result<(), AgentError> {
        info!("Installing launch agent {}", Self::label(&spec.name));
        write_file(&self.plist_path(&spec.name), Self::render_plist(spec)).await
    }

    async fn start(&self, name: &str) -> Result<(), AgentError> {
        let path = self.plist_path(name).to_string_lossy().to_string();
        exec_checked("launchctl", &["load", "-w", &path]).await
    }

    async fn stop(&self, name: &str) -> Result<(), AgentError> {
        let path = self.plist_path(name).to_string_lossy().to_string();
        exec_checked("launchctl", &["unload", "-w", &path]).await
    }

    async fn remove(&self, name: &str) -> Result<(), AgentError> {
        let path = self.plist_path(name);
        info!("Removing launch agent {}", Self::label(name));
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }
}
